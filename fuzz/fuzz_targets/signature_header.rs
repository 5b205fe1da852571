#![no_main]

//! Arbitrary `x-inngest-signature` headers and bodies must be rejected
//! cleanly, never panic.

use std::sync::Arc;

use fngate_api::{parse_signature_header, SignatureSettings, SignatureVerifier};
use fngate_core::TestClock;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let (header, body) = data.split_at(split);
    let Ok(header) = std::str::from_utf8(header) else {
        return;
    };

    let _ = parse_signature_header(header);

    let clock = Arc::new(TestClock::at_unix_seconds(1_700_000_000));
    let verifier = SignatureVerifier::new(SignatureSettings::with_key("signkey-test-fuzz"), clock);
    let _ = verifier.verify_header(Some(header), Some(body));
    let _ = verifier.verify_header(Some(header), None);
});
