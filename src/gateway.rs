//! Assembly of a running gateway from configuration and declared functions.

use std::{future::Future, sync::Arc};

use anyhow::Context;
use axum::Router;
use fngate_api::{server, GatewayConfig, SignatureVerifier, WebhookController};
use fngate_core::{
    Clock, ConfigError, DiscoveryPolicy, Event, EventError, EventSchema, EventSink,
    EventValidator, FunctionConfig, FunctionError, FunctionHandler, FunctionProvider,
    FunctionRegistry, HandlerFactory, RealClock, SendReceipt,
};
use fngate_runtime::ExecutionContextService;
use fngate_transport::{
    BatchReport, ConnectionPool, EventBackend, EventTransport, PlatformClient, PlatformConfig,
    TransportError,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Failure to assemble a [`Gateway`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A function could not be registered.
    #[error(transparent)]
    Function(#[from] FunctionError),

    /// The outbound HTTP stack could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum Registration {
    Shared(FunctionConfig, Arc<dyn FunctionHandler>),
    Factory(FunctionConfig, Arc<dyn HandlerFactory>),
}

/// Collects functions and collaborators, then builds a [`Gateway`].
///
/// Registration errors surface from [`build`](Self::build), so declarations
/// can be chained freely.
pub struct GatewayBuilder {
    config: GatewayConfig,
    clock: Arc<dyn Clock>,
    registrations: Vec<Registration>,
    providers: Vec<Arc<dyn FunctionProvider>>,
    schemas: Vec<(String, EventSchema)>,
    backend: Option<Arc<dyn EventBackend>>,
}

impl GatewayBuilder {
    /// Starts from `config` with the system clock and the platform client.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clock: Arc::new(RealClock),
            registrations: Vec::new(),
            providers: Vec::new(),
            schemas: Vec::new(),
            backend: None,
        }
    }

    /// Registers a handler shared by all invocations.
    #[must_use]
    pub fn function(mut self, config: FunctionConfig, handler: Arc<dyn FunctionHandler>) -> Self {
        self.registrations.push(Registration::Shared(config, handler));
        self
    }

    /// Registers a factory producing one handler per invocation.
    #[must_use]
    pub fn function_factory(mut self, config: FunctionConfig, factory: Arc<dyn HandlerFactory>) -> Self {
        self.registrations.push(Registration::Factory(config, factory));
        self
    }

    /// Adds a provider whose declared functions are discovered at build.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn FunctionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Checks outbound events named `event_name` against `schema`.
    #[must_use]
    pub fn event_schema(mut self, event_name: impl Into<String>, schema: EventSchema) -> Self {
        self.schemas.push((event_name.into(), schema));
        self
    }

    /// Replaces the clock. Tests use a manual clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sends events through `backend` instead of the platform HTTP client.
    #[must_use]
    pub fn event_backend(mut self, backend: Arc<dyn EventBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validates the configuration, registers every function and wires the
    /// outbound and inbound paths.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Config`] if the configuration is invalid
    /// - [`GatewayError::Function`] on a duplicate id or malformed function.
    ///   Provider failures are returned as the first error under strict
    ///   discovery and as one aggregate [`FunctionError::Discovery`] under
    ///   best-effort discovery
    /// - [`GatewayError::Transport`] if the HTTP agents cannot be built
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let Self { config, clock, registrations, providers, schemas, backend } = self;
        config.validate()?;

        let registry = build_registry(registrations, &providers, config.discovery_policy())?;

        let pool = Arc::new(ConnectionPool::new(
            config.to_pool_config(),
            config.to_retry_policy(),
            config.to_circuit_config(),
            Arc::clone(&clock),
        )?);

        let backend = backend.unwrap_or_else(|| {
            let platform = config.platform_config().unwrap_or_else(|| PlatformConfig {
                base_url: config.base_url.clone(),
                event_key: String::new(),
            });
            let client: Arc<dyn EventBackend> =
                Arc::new(PlatformClient::new(platform, pool.agents().clone()));
            client
        });

        let mut validator = EventValidator::new(config.to_validation_options());
        for (name, schema) in schemas {
            validator.register_schema(name, schema);
        }

        let transport = Arc::new(
            EventTransport::new(
                config.to_transport_config(),
                Arc::clone(&pool),
                backend,
                Arc::clone(&clock),
            )
            .with_validator(validator),
        );

        let sink: Arc<dyn EventSink> = transport.clone();
        let runtime =
            Arc::new(ExecutionContextService::new(Arc::clone(&clock)).with_event_sink(sink));

        let verifier = SignatureVerifier::new(config.signature_settings(), Arc::clone(&clock));

        let controller = Arc::new(
            WebhookController::new(
                config.app_id.clone(),
                config.endpoint.clone(),
                Arc::clone(&registry),
                Arc::clone(&runtime),
                verifier,
            )
            .with_serve_url(config.serve_url())
            .with_pool(Arc::clone(&pool))
            .with_error_details(config.is_dev),
        );

        if config.event_key.is_none() {
            warn!("no event key configured, outbound event sends will be rejected");
        }

        info!(
            app_id = %config.app_id,
            endpoint = %config.endpoint,
            functions = registry.len(),
            dev = config.is_dev,
            "gateway assembled"
        );

        Ok(Gateway { config, registry, pool, transport, runtime, controller })
    }
}

fn build_registry(
    registrations: Vec<Registration>,
    providers: &[Arc<dyn FunctionProvider>],
    policy: DiscoveryPolicy,
) -> Result<Arc<FunctionRegistry>, FunctionError> {
    let mut registry = FunctionRegistry::new();

    for registration in registrations {
        match registration {
            Registration::Shared(config, handler) => registry.register_handler(config, handler)?,
            Registration::Factory(config, factory) => registry.register_factory(config, factory)?,
        }
    }

    // Best effort still fails the build, after every provider was attempted.
    registry.discover(providers, policy)?;

    Ok(registry.into_shared())
}

/// A fully wired gateway.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<FunctionRegistry>,
    pool: Arc<ConnectionPool>,
    transport: Arc<EventTransport>,
    runtime: Arc<ExecutionContextService>,
    controller: Arc<WebhookController>,
}

impl Gateway {
    /// Starts a [`GatewayBuilder`].
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Active configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Registered functions.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Outbound event path.
    pub fn transport(&self) -> &Arc<EventTransport> {
        &self.transport
    }

    /// Invocation runtime.
    pub fn runtime(&self) -> &Arc<ExecutionContextService> {
        &self.runtime
    }

    /// Webhook protocol controller.
    pub fn controller(&self) -> &Arc<WebhookController> {
        &self.controller
    }

    /// Sends one event.
    ///
    /// # Errors
    ///
    /// See [`EventTransport::send_event`].
    pub async fn send_event(&self, event: Event) -> Result<SendReceipt, EventError> {
        self.transport.send_event(event).await
    }

    /// Sends events as a single request.
    ///
    /// # Errors
    ///
    /// See [`EventTransport::send`].
    pub async fn send(&self, events: Vec<Event>) -> Result<SendReceipt, EventError> {
        self.transport.send(events).await
    }

    /// Sends events in chunks of the configured batch size.
    ///
    /// # Errors
    ///
    /// See [`EventTransport::send_batch`].
    pub async fn send_batch(&self, events: Vec<Event>) -> Result<BatchReport, EventError> {
        self.transport.send_batch(events).await
    }

    /// axum router for the webhook endpoint and `/health`.
    pub fn router(&self) -> Router {
        server::create_router(Arc::clone(&self.controller), self.config.request_timeout())
    }

    /// Binds the configured address and serves until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.parse_server_addr()?;
        let listener =
            TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
        self.serve_on(listener, server::shutdown_signal()).await
    }

    /// Serves on `listener` until `shutdown` resolves, then closes the
    /// outbound pool.
    ///
    /// # Errors
    ///
    /// Returns the server's accept error.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        server::serve(listener, router, shutdown).await.context("webhook server failed")?;

        self.pool.close();
        info!("gateway shutdown complete");
        Ok(())
    }
}
