#![no_main]

//! Arbitrary JSON goes through raw and typed validation without panicking.

use fngate_core::{Event, EventValidator, ValidationOptions};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    for strict in [false, true] {
        let validator =
            EventValidator::new(ValidationOptions { strict, ..ValidationOptions::default() });
        let _ = validator.validate_raw(&value);

        if let Ok(event) = serde_json::from_value::<Event>(value.clone()) {
            let _ = validator.validate(&event);
            let _ = validator.validate_batch(std::slice::from_ref(&event));
        }
    }
});
