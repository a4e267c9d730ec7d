//! Fuzz testing for the wire decoder.
//!
//! `decode` and `payload_preview` must never panic on arbitrary bytes, and
//! anything `decode` accepts must survive `encode` then `decode` unchanged.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_decode
//! cargo +nightly fuzz run fuzz_decode -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use weather_relay::codec::{decode, encode, payload_preview};

fuzz_target!(|data: &[u8]| {
    let _ = payload_preview(data);

    if let Ok(reading) = decode(data) {
        let payload = encode(&reading).expect("accepted reading must encode");
        assert_eq!(decode(&payload), Ok(reading));
    }
});
