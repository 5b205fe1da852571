//! Handler execution for the function gateway.
//!
//! [`ExecutionContextService`] turns a registered function, an event, a run
//! id and an attempt number into an isolated [`ExecutionContext`], then runs
//! the handler with step tools bound to that invocation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod duration;
pub mod error;
pub mod service;
pub mod tools;

pub use context::ExecutionContext;
pub use duration::parse_duration;
pub use error::RuntimeError;
pub use service::{ExecutionContextService, ExecutionOutcome};
pub use tools::InvocationStepTools;
