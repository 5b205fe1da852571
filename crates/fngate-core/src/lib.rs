//! Core types for the function gateway.
//!
//! Events and their validation, function configuration and the registry,
//! handler and step-tool contracts, the error taxonomy and the clock. Every
//! other gateway crate builds on these.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod function;
pub mod handler;
pub mod registry;
pub mod time;
pub mod validation;

pub use error::{BoxError, ConfigError, DiscoveryFailure, ErrorKind, EventError, FunctionError};
pub use event::{Event, EventUser, SendReceipt};
pub use function::{
    ConcurrencyConfig, CronTrigger, EventTrigger, FunctionConfig, FunctionDefinition,
    RateLimitConfig, Trigger, WireTrigger,
};
pub use handler::{
    handler_fn, ContextLogger, EventSink, FunctionHandler, HandlerContext, HandlerFactory,
    HandlerSource, NonRetriableError, Step, StepError, StepKind, StepOutcome, StepRecord,
    StepTools,
};
pub use registry::{
    DeclaredFunction, DiscoveryPolicy, FunctionMetadata, FunctionProvider, FunctionRegistry,
};
pub use time::{Clock, RealClock, TestClock};
pub use validation::{
    EventSchema, EventValidator, ValidationCode, ValidationErrorDetail, ValidationErrorReporter,
    ValidationOptions, ValidationResult,
};
