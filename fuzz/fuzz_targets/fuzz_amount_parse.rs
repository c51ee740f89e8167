#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_types::{convert, AmountFields, Decimal, Denomination};

// Every display unit must convert back to the same satoshi value.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let _ = input.parse::<Decimal>();

    for unit in Denomination::ALL {
        let fields = AmountFields::unit(unit, input);
        let Ok(Some(amount)) = fields.single() else {
            continue;
        };
        let Ok(converted) = convert(&amount, None) else {
            continue;
        };
        for other in Denomination::ALL {
            let back = AmountFields::unit(other, converted.get(other));
            let amount = back.single().expect("rendered amount parses").expect("has amount");
            let again = convert(&amount, None).expect("rendered amount converts");
            assert_eq!(again.satoshi, converted.satoshi);
        }
    }
});
