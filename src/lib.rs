//! fngate: a webhook gateway that runs registered functions for a
//! durable-execution platform.
//!
//! The facade wires the workspace crates together. Applications declare
//! functions, hand them to a [`GatewayBuilder`] and either mount
//! [`Gateway::router`] in their own axum app or call [`Gateway::serve`].
//!
//! ```no_run
//! use fngate::{init_tracing, Gateway, GatewayConfig};
//! use fngate_core::{handler_fn, FunctionConfig};
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! init_tracing();
//!
//! let gateway = Gateway::builder(GatewayConfig::load()?)
//!     .function(
//!         FunctionConfig::new("send-welcome").on_event("user.created"),
//!         handler_fn(|event, _ctx| async move { Ok(json!({"sent": event.data})) }),
//!     )
//!     .build()?;
//!
//! gateway.serve().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gateway;
pub mod telemetry;

pub use fngate_api::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder, GatewayError};
pub use telemetry::init_tracing;
