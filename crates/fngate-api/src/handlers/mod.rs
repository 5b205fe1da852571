//! Axum handlers.
//!
//! Thin adapters: each extracts what the framework-agnostic
//! [`WebhookController`](crate::webhook::WebhookController) needs and turns
//! its answer back into an axum response.

pub mod health;
pub mod webhook;

pub use health::health_check;
pub use webhook::handle_webhook;
