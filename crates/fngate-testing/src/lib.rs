//! Test infrastructure for the fngate workspace.
//!
//! Provides event and invocation fixtures, a scripted in-memory event
//! backend, a wiremock-backed platform, and helpers that sign webhook calls
//! the way the platform does.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod fixtures;
pub mod platform;
pub mod signing;

pub use backend::{RecordingSink, ScriptedBackend};
pub use fixtures::{test_transport, user_created, InvocationBuilder};
pub use fngate_core::{Clock, TestClock};
pub use platform::MockPlatform;
pub use signing::{signed_headers, signed_request, TEST_SIGNING_KEY};
