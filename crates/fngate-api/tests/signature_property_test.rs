//! Properties of signing and verification.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use fngate_api::{sign, SignatureSettings, SignatureVerifier};
use fngate_core::TestClock;
use proptest::prelude::*;

const NOW: u64 = 1_700_000_000;

fn verifier(key: &str) -> SignatureVerifier {
    SignatureVerifier::new(
        SignatureSettings::with_key(key),
        Arc::new(TestClock::at_unix_seconds(NOW)),
    )
}

proptest! {
    #[test]
    fn signed_bodies_verify(
        body in proptest::collection::vec(any::<u8>(), 0..512),
        key in "[a-zA-Z0-9-]{1,64}",
        skew in -300i64..=300,
    ) {
        let t = NOW as i64 + skew;
        let header = sign(&body, &key, t).unwrap();

        let parsed = verifier(&key).verify_header(Some(&header), Some(&body)).unwrap();
        prop_assert_eq!(parsed.timestamp, t);
    }

    #[test]
    fn any_single_byte_change_fails(
        body in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let key = "signkey-test-avalanche";
        let header = sign(&body, key, NOW as i64).unwrap();

        let mut tampered = body.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= flip;

        let error = verifier(key).verify_header(Some(&header), Some(&tampered)).unwrap_err();
        prop_assert_eq!(error.code, "INVALID_SIGNATURE");
    }

    #[test]
    fn timestamps_outside_tolerance_expire(offset in 301i64..100_000, future in any::<bool>()) {
        let key = "signkey-test-expiry";
        let t = if future { NOW as i64 + offset } else { NOW as i64 - offset };
        let header = sign(b"{}", key, t).unwrap();

        let error = verifier(key).verify_header(Some(&header), Some(b"{}")).unwrap_err();
        prop_assert_eq!(error.code, "SIGNATURE_EXPIRED");
    }
}
