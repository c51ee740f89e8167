#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_crypto::{import_private_key, is_bip38, parse_wif};
use satchel_types::NetworkId;

// Arbitrary key strings must fail cleanly. BIP38 decryption is skipped:
// scrypt makes each attempt too slow to be useful here.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    for network in [NetworkId::Mainnet, NetworkId::Testnet, NetworkId::Regtest] {
        let _ = parse_wif(input, network);
        if !is_bip38(input) {
            let _ = import_private_key(input, None, network);
        }
    }
});
