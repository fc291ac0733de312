#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use passgate_core::crypto::{open, DerivedKey};

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    blob: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Tampered or truncated store files must come back as errors, never panics.
    let key = DerivedKey::from(input.key);
    let _ = open(&key, &input.blob);
});
