//! Function registry.
//!
//! The registry is filled once at startup (explicit registration or
//! provider discovery), then frozen with [`FunctionRegistry::into_shared`]
//! and read concurrently by the webhook path.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    error::{DiscoveryFailure, FunctionError},
    function::{FunctionConfig, FunctionDefinition, Trigger},
    handler::{FunctionHandler, HandlerFactory, HandlerSource},
};

/// Owner name used for functions registered without a provider.
pub const DIRECT_OWNER: &str = "app";

/// A function a provider declares.
#[derive(Debug, Clone)]
pub struct DeclaredFunction {
    /// Method the provider binds.
    pub method: String,
    /// Function configuration.
    pub config: FunctionConfig,
}

impl DeclaredFunction {
    /// Declares `method` with `config`.
    pub fn new(method: impl Into<String>, config: FunctionConfig) -> Self {
        Self { method: method.into(), config }
    }
}

/// A source of functions, such as a service object exposing handlers.
pub trait FunctionProvider: Send + Sync {
    /// Provider name used in logs and metadata.
    fn name(&self) -> &str;

    /// Functions this provider declares.
    fn functions(&self) -> Vec<DeclaredFunction>;

    /// Binds a declared method to a handler. `None` means not callable.
    fn bind(&self, method: &str) -> Option<HandlerSource>;
}

/// How [`FunctionRegistry::discover`] reacts to failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryPolicy {
    /// Try every declaration, then report all failures together.
    #[default]
    BestEffort,
    /// Stop at the first failure.
    Strict,
}

/// A registered function.
pub struct FunctionMetadata {
    /// Provider that declared it.
    pub owner: String,
    /// Provider method bound to the handler.
    pub method: String,
    /// Validated configuration.
    pub config: FunctionConfig,
    /// Handler source.
    pub handler: HandlerSource,
}

impl FunctionMetadata {
    /// Function id.
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

impl fmt::Debug for FunctionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionMetadata")
            .field("owner", &self.owner)
            .field("method", &self.method)
            .field("config", &self.config)
            .field("handler", &self.handler)
            .finish()
    }
}

/// Id-indexed store of registered functions.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<Arc<FunctionMetadata>>,
    by_id: HashMap<String, usize>,
    by_event: HashMap<String, Vec<usize>>,
    by_cron: HashMap<String, Vec<usize>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` of `provider` under `config`.
    ///
    /// # Errors
    ///
    /// - [`FunctionError::DuplicateFunctionId`] if the id is taken
    /// - [`FunctionError::InvalidConfig`] if the configuration is malformed
    /// - [`FunctionError::InvalidHandler`] if the provider cannot bind `method`
    pub fn register(
        &mut self,
        provider: &dyn FunctionProvider,
        method: &str,
        config: FunctionConfig,
    ) -> Result<(), FunctionError> {
        self.ensure_unique(&config.id)?;
        config.validate()?;

        let handler = provider.bind(method).ok_or_else(|| FunctionError::InvalidHandler {
            provider: provider.name().to_string(),
            method: method.to_string(),
        })?;

        self.insert(provider.name().to_string(), method.to_string(), config, handler);
        Ok(())
    }

    /// Registers a shared handler directly.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register), minus `InvalidHandler`.
    pub fn register_handler(
        &mut self,
        config: FunctionConfig,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<(), FunctionError> {
        self.register_source(config, HandlerSource::Shared(handler))
    }

    /// Registers a factory creating one handler per invocation.
    ///
    /// # Errors
    ///
    /// Same as [`register_handler`](Self::register_handler).
    pub fn register_factory(
        &mut self,
        config: FunctionConfig,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<(), FunctionError> {
        self.register_source(config, HandlerSource::Factory(factory))
    }

    fn register_source(&mut self, config: FunctionConfig, handler: HandlerSource) -> Result<(), FunctionError> {
        self.ensure_unique(&config.id)?;
        config.validate()?;
        let method = config.id.clone();
        self.insert(DIRECT_OWNER.to_string(), method, config, handler);
        Ok(())
    }

    fn ensure_unique(&self, id: &str) -> Result<(), FunctionError> {
        if self.by_id.contains_key(id) {
            return Err(FunctionError::DuplicateFunctionId { id: id.to_string() });
        }
        Ok(())
    }

    fn insert(&mut self, owner: String, method: String, config: FunctionConfig, handler: HandlerSource) {
        let index = self.functions.len();

        for trigger in &config.triggers {
            let indexes = match trigger {
                Trigger::Event(t) => self.by_event.entry(t.event.clone()).or_default(),
                Trigger::Cron(t) => self.by_cron.entry(t.cron.clone()).or_default(),
            };
            // Several triggers may share a key; the function is indexed once.
            if !indexes.contains(&index) {
                indexes.push(index);
            }
        }

        debug!(function_id = %config.id, owner = %owner, method = %method, "function registered");
        self.by_id.insert(config.id.clone(), index);
        self.functions.push(Arc::new(FunctionMetadata { owner, method, config, handler }));
    }

    /// Registers every function declared by `providers`.
    ///
    /// Returns the number of functions registered.
    ///
    /// # Errors
    ///
    /// Under [`DiscoveryPolicy::Strict`] the first registration error is
    /// returned as is. Under [`DiscoveryPolicy::BestEffort`] all
    /// declarations are attempted and the failures are returned together
    /// as [`FunctionError::Discovery`]; successful registrations are kept.
    pub fn discover(
        &mut self,
        providers: &[Arc<dyn FunctionProvider>],
        policy: DiscoveryPolicy,
    ) -> Result<usize, FunctionError> {
        let mut registered = 0;
        let mut failures = Vec::new();

        for provider in providers {
            for declared in provider.functions() {
                let id = declared.config.id.clone();
                match self.register(provider.as_ref(), &declared.method, declared.config) {
                    Ok(()) => registered += 1,
                    Err(e) if policy == DiscoveryPolicy::Strict => return Err(e),
                    Err(e) => {
                        warn!(
                            provider = %provider.name(),
                            method = %declared.method,
                            function_id = %id,
                            error = %e,
                            "function registration failed"
                        );
                        failures.push(DiscoveryFailure {
                            provider: provider.name().to_string(),
                            method: declared.method,
                            error: Box::new(e),
                        });
                    },
                }
            }
        }

        info!(registered, failed = failures.len(), providers = providers.len(), "function discovery finished");

        if failures.is_empty() {
            Ok(registered)
        } else {
            Err(FunctionError::Discovery { failures })
        }
    }

    /// Looks up a function by id.
    pub fn lookup(&self, id: &str) -> Option<Arc<FunctionMetadata>> {
        self.by_id.get(id).map(|&index| Arc::clone(&self.functions[index]))
    }

    /// Functions triggered by `event`, in registration order.
    pub fn lookup_by_event(&self, event: &str) -> Vec<Arc<FunctionMetadata>> {
        self.collect(self.by_event.get(event))
    }

    /// Functions scheduled by the cron `expression`, in registration order.
    pub fn lookup_by_cron(&self, expression: &str) -> Vec<Arc<FunctionMetadata>> {
        self.collect(self.by_cron.get(expression))
    }

    fn collect(&self, indexes: Option<&Vec<usize>>) -> Vec<Arc<FunctionMetadata>> {
        indexes
            .map(|indexes| indexes.iter().map(|&i| Arc::clone(&self.functions[i])).collect())
            .unwrap_or_default()
    }

    /// Every registered function, in registration order.
    pub fn functions(&self) -> impl Iterator<Item = &Arc<FunctionMetadata>> {
        self.functions.iter()
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.id()).collect()
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Builds the sync payload for every function, in registration order.
    pub fn to_definitions(&self, app_id: &str, serve_url: Option<&str>) -> Vec<FunctionDefinition> {
        self.functions
            .iter()
            .map(|f| FunctionDefinition::from_config(app_id, &f.config, serve_url))
            .collect()
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.functions.clear();
        self.by_id.clear();
        self.by_event.clear();
        self.by_cron.clear();
    }

    /// Freezes the registry for concurrent reads.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> Arc<dyn FunctionHandler> {
        handler_fn(|_, _| async { Ok(Value::Null) })
    }

    struct Billing;

    impl FunctionProvider for Billing {
        fn name(&self) -> &str {
            "billing"
        }

        fn functions(&self) -> Vec<DeclaredFunction> {
            vec![
                DeclaredFunction::new("charge", FunctionConfig::new("charge-card").on_event("order.created")),
                DeclaredFunction::new("missing", FunctionConfig::new("refund").on_event("order.refunded")),
                DeclaredFunction::new("charge", FunctionConfig::new("Bad_Id").on_event("x")),
                DeclaredFunction::new("report", FunctionConfig::new("nightly-report").on_cron("0 2 * * *")),
            ]
        }

        fn bind(&self, method: &str) -> Option<HandlerSource> {
            matches!(method, "charge" | "report").then(|| HandlerSource::Shared(noop()))
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = FunctionRegistry::new();
        registry.register_handler(FunctionConfig::new("a").on_event("x"), noop()).unwrap();

        let error = registry.register_handler(FunctionConfig::new("a").on_event("y"), noop()).unwrap_err();
        assert!(matches!(error, FunctionError::DuplicateFunctionId { ref id } if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookups_preserve_insertion_order() {
        let mut registry = FunctionRegistry::new();
        for id in ["third", "first", "second"] {
            registry.register_handler(FunctionConfig::new(id).on_event("user.created"), noop()).unwrap();
        }
        registry.register_handler(FunctionConfig::new("cron-job").on_cron("*/5 * * * *"), noop()).unwrap();

        let ids: Vec<_> = registry.lookup_by_event("user.created").iter().map(|f| f.id().to_string()).collect();
        assert_eq!(ids, ["third", "first", "second"]);
        assert_eq!(registry.lookup_by_cron("*/5 * * * *").len(), 1);
        assert!(registry.lookup_by_event("other").is_empty());
        assert_eq!(registry.ids(), ["third", "first", "second", "cron-job"]);
    }

    #[test]
    fn best_effort_discovery_collects_all_failures() {
        let providers: Vec<Arc<dyn FunctionProvider>> = vec![Arc::new(Billing)];
        let mut registry = FunctionRegistry::new();

        let error = registry.discover(&providers, DiscoveryPolicy::BestEffort).unwrap_err();

        let FunctionError::Discovery { failures } = error else { panic!("expected discovery error") };
        assert_eq!(failures.len(), 2);
        assert!(matches!(*failures[0].error, FunctionError::InvalidHandler { .. }));
        assert!(matches!(*failures[1].error, FunctionError::InvalidConfig { .. }));
        assert_eq!(registry.ids(), ["charge-card", "nightly-report"]);
    }

    #[test]
    fn strict_discovery_stops_at_first_failure() {
        let providers: Vec<Arc<dyn FunctionProvider>> = vec![Arc::new(Billing)];
        let mut registry = FunctionRegistry::new();

        let error = registry.discover(&providers, DiscoveryPolicy::Strict).unwrap_err();

        assert!(matches!(error, FunctionError::InvalidHandler { ref method, .. } if method == "missing"));
        assert_eq!(registry.ids(), ["charge-card"]);
    }

    #[test]
    fn metadata_records_owner_and_method() {
        let providers: Vec<Arc<dyn FunctionProvider>> = vec![Arc::new(Billing)];
        let mut registry = FunctionRegistry::new();
        let _ = registry.discover(&providers, DiscoveryPolicy::BestEffort);

        let metadata = registry.lookup("nightly-report").unwrap();
        assert_eq!(metadata.owner, "billing");
        assert_eq!(metadata.method, "report");
    }

    #[test]
    fn definitions_follow_registration_order() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_handler(
                FunctionConfig::new("welcome")
                    .name("Welcome")
                    .trigger(Trigger::event_if("user.created", "event.data.plan == 'pro'")),
                noop(),
            )
            .unwrap();
        registry
            .register_handler(
                FunctionConfig::new("digest")
                    .trigger(Trigger::cron_in("0 8 * * *", "Europe/Paris"))
                    .retries(0),
                noop(),
            )
            .unwrap();

        let definitions = registry.to_definitions("shop", None);

        insta::assert_json_snapshot!(definitions, @r###"
        [
          {
            "id": "welcome",
            "name": "Welcome",
            "triggers": [
              {
                "event": "user.created",
                "expression": "event.data.plan == 'pro'"
              }
            ],
            "retries": {
              "attempts": 3
            },
            "timeoutMs": 30000
          },
          {
            "id": "digest",
            "name": "digest",
            "triggers": [
              {
                "cron": "0 8 * * *",
                "timezone": "Europe/Paris"
              }
            ],
            "retries": {
              "attempts": 0
            },
            "timeoutMs": 30000
          }
        ]
        "###);
    }

    #[test]
    fn repeated_trigger_keys_index_a_function_once() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_handler(
                FunctionConfig::new("a")
                    .on_event("x")
                    .trigger(Trigger::event_if("x", "event.data.vip == true"))
                    .on_cron("0 * * * *")
                    .trigger(Trigger::cron_in("0 * * * *", "UTC")),
                noop(),
            )
            .unwrap();
        registry.register_handler(FunctionConfig::new("b").on_event("x"), noop()).unwrap();

        let ids: Vec<_> = registry.lookup_by_event("x").iter().map(|f| f.id().to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(registry.lookup_by_cron("0 * * * *").len(), 1);
    }

    #[test]
    fn clear_empties_every_index() {
        let mut registry = FunctionRegistry::new();
        registry.register_handler(FunctionConfig::new("a").on_event("x").on_cron("0 * * * *"), noop()).unwrap();

        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.lookup("a").is_none());
        assert!(registry.lookup_by_event("x").is_empty());
        assert!(registry.lookup_by_cron("0 * * * *").is_empty());
        registry.register_handler(FunctionConfig::new("a").on_event("x"), noop()).unwrap();
    }
}
