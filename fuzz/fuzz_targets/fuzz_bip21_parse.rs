#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_types::{AmountFields, NetworkId};
use satchel_wallet_core::{parse_bip21, resolve_addressee, Addressee};

// Addressee resolution must reject garbage with an error code, never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(Some(uri)) = parse_bip21(input) {
        assert!(!uri.address.is_empty());
    }

    for network in [NetworkId::Mainnet, NetworkId::Testnet] {
        let addressee = Addressee::new(input, AmountFields::default());
        if let Ok(resolved) = resolve_addressee(&addressee, network, None, true) {
            assert!(resolved.satoshi <= satchel_types::MAX_MONEY);
        }
    }
});
