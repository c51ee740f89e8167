use proptest::prelude::*;

use satchel_types::amount::{fiat_to_satoshi, satoshi_to_fiat, to_satoshi};
use satchel_types::{convert, AmountInput, Decimal, Denomination, FiatRate, Satoshi, MAX_MONEY};

proptest! {
    /// Every display unit converts back to the satoshi it came from.
    #[test]
    fn display_units_are_lossless(sat in 0u64..=MAX_MONEY) {
        let converted = convert(&AmountInput::Satoshi(sat), None).unwrap();
        for unit in [Denomination::Btc, Denomination::Mbtc, Denomination::Ubtc, Denomination::Bits] {
            let value = unit.parse_amount(&converted.get(unit)).unwrap();
            let back = to_satoshi(&AmountInput::Unit(unit, value), None).unwrap();
            prop_assert_eq!(back.value(), sat);
        }
    }

    /// Display strings always carry the unit's full number of fraction digits.
    #[test]
    fn display_precision_is_fixed(sat in 0u64..=MAX_MONEY) {
        let converted = convert(&AmountInput::Satoshi(sat), None).unwrap();
        let fraction_len = |s: &str| s.split_once('.').map(|(_, f)| f.len()).unwrap_or(0);
        prop_assert_eq!(fraction_len(&converted.btc), 8);
        prop_assert_eq!(fraction_len(&converted.mbtc), 5);
        prop_assert_eq!(fraction_len(&converted.ubtc), 2);
        prop_assert_eq!(fraction_len(&converted.bits), 2);
    }

    /// Satoshi -> fiat -> satoshi stays within the satoshi worth of half a cent.
    #[test]
    fn fiat_roundtrip_is_bounded(cents in 1u64..10_000_000, rate_cents in 100u64..100_000_000) {
        let rate = FiatRate::new("USD", Decimal::new(u128::from(rate_cents), 2));
        let fiat = Decimal::new(u128::from(cents), 2);
        let sat = fiat_to_satoshi(&fiat, &rate).unwrap();
        let back = satoshi_to_fiat(sat, &rate).unwrap();
        let diff = fiat.to_scaled(2).unwrap().abs_diff(back.to_scaled(2).unwrap());
        prop_assert!(diff <= 1, "{} -> {} -> {}", fiat, sat, back);
    }

    /// Decimal parsing and display agree.
    #[test]
    fn decimal_display_parses_back(mantissa in 0u128..u128::from(u64::MAX), scale in 0u32..12) {
        let value = Decimal::new(mantissa, scale);
        let parsed: Decimal = value.to_string().parse().unwrap();
        prop_assert_eq!(parsed, value);
    }

    /// Satoshi ordering follows the inner value.
    #[test]
    fn satoshi_ordering(a in 0u64..=MAX_MONEY, b in 0u64..=MAX_MONEY) {
        prop_assert_eq!(Satoshi::new(a) <= Satoshi::new(b), a <= b);
    }
}
