//! Inbound webhook surface of the function gateway.
//!
//! - [`signature`]: HMAC verification of platform calls
//! - [`webhook`]: the framework-agnostic protocol controller
//! - [`server`] and [`handlers`]: the axum adapter
//! - [`config`]: layered gateway configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod signature;
pub mod webhook;

pub use config::GatewayConfig;
pub use error::WebhookError;
pub use server::{create_router, start_server};
pub use signature::{
    parse_signature_header, sign, ParsedSignature, SignatureSettings, SignatureStatus,
    SignatureVerifier,
};
pub use webhook::{
    HealthReport, InvokeRequest, WebhookController, WebhookRequest, WebhookResponse,
};
