//! Property tests for registration invariants.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;

use fngate::{Gateway, GatewayConfig, GatewayError};
use fngate_core::{handler_fn, Event, FunctionConfig, FunctionError, FunctionRegistry};
use proptest::prelude::*;
use serde_json::Value;

fn function_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}(-[a-z0-9]{1,4}){0,2}"
}

fn config(id: &str) -> FunctionConfig {
    FunctionConfig::new(id).on_event("test.event")
}

proptest! {
    #[test]
    fn unique_ids_register_in_order(ids in prop::collection::btree_set(function_id(), 1..20)) {
        let mut registry = FunctionRegistry::new();
        let handler = handler_fn(|_event: Event, _ctx| async { Ok(Value::Null) });

        for id in &ids {
            registry.register_handler(config(id), handler.clone()).unwrap();
        }

        prop_assert_eq!(registry.len(), ids.len());
        prop_assert_eq!(registry.ids(), ids.iter().map(String::as_str).collect::<Vec<_>>());
        for id in &ids {
            let function = registry.lookup(id).unwrap();
            prop_assert_eq!(function.id(), id.as_str());
        }
    }

    #[test]
    fn a_repeated_id_is_rejected_wherever_it_appears(
        ids in prop::collection::btree_set(function_id(), 1..12),
        pick in any::<prop::sample::Index>(),
        position in any::<prop::sample::Index>(),
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let duplicate = pick.get(&ids).clone();
        let mut sequence = ids.clone();
        let at = position.index(sequence.len() + 1);
        sequence.insert(at, duplicate.clone());

        let handler = handler_fn(|_event: Event, _ctx| async { Ok(Value::Null) });
        let mut builder = Gateway::builder(GatewayConfig::default());
        for id in &sequence {
            builder = builder.function(config(id), handler.clone());
        }

        match builder.build() {
            Err(GatewayError::Function(FunctionError::DuplicateFunctionId { id })) => {
                prop_assert_eq!(id, duplicate);
            },
            other => prop_assert!(false, "expected a duplicate id error, got {:?}", other.err()),
        }

        let distinct: BTreeSet<&String> = sequence.iter().collect();
        prop_assert_eq!(distinct.len(), ids.len());
    }
}
