#![no_main]

use libfuzzer_sys::fuzz_target;
use mdoc_transfer::definitions::SessionEstablishment;
use mdoc_transfer::presentation::fragment;

fuzz_target!(|data: &[u8]| {
    let fragments = data.split(|b| *b == 0xFE);
    if let Ok(Some(message)) = fragment::reassemble(fragments) {
        let _ = mdoc_transfer::cbor::from_slice::<SessionEstablishment>(&message);
    }
});
