//! Function configuration, triggers and the sync wire format.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::FunctionError, validation::is_valid_function_id};

/// Retries applied when a function does not configure any.
pub const DEFAULT_RETRIES: u32 = 3;
/// Upper bound for configured retries.
pub const MAX_RETRIES: u32 = 10;
/// Timeout applied when a function does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Smallest accepted function timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1_000);
/// Largest accepted function timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_millis(300_000);

/// What causes a function to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Runs when a matching event arrives.
    Event(EventTrigger),
    /// Runs on a cron schedule.
    Cron(CronTrigger),
}

/// Event trigger with an optional filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Event name to match.
    pub event: String,
    /// Filter expression evaluated by the platform.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Cron trigger with an optional timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTrigger {
    /// Five or six field cron expression.
    pub cron: String,
    /// IANA timezone the expression is evaluated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Trigger {
    /// Trigger on an event name.
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(EventTrigger { event: name.into(), condition: None })
    }

    /// Trigger on an event name filtered by an expression.
    pub fn event_if(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self::Event(EventTrigger { event: name.into(), condition: Some(condition.into()) })
    }

    /// Trigger on a cron expression.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron(CronTrigger { cron: expression.into(), timezone: None })
    }

    /// Trigger on a cron expression evaluated in `timezone`.
    pub fn cron_in(expression: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self::Cron(CronTrigger { cron: expression.into(), timezone: Some(timezone.into()) })
    }

    fn check(&self) -> Result<(), String> {
        match self {
            Self::Event(trigger) if trigger.event.trim().is_empty() => {
                Err("event trigger name must not be empty".to_string())
            },
            Self::Event(_) => Ok(()),
            Self::Cron(trigger) => {
                let fields = trigger.cron.split_whitespace().count();
                if (5..=6).contains(&fields) {
                    Ok(())
                } else {
                    Err(format!(
                        "cron expression `{}` must have 5 or 6 fields, found {fields}",
                        trigger.cron
                    ))
                }
            },
        }
    }

    /// Converts to the wire representation.
    pub fn to_wire(&self) -> WireTrigger {
        match self {
            Self::Event(t) => {
                WireTrigger::Event { event: t.event.clone(), expression: t.condition.clone() }
            },
            Self::Cron(t) => WireTrigger::Cron { cron: t.cron.clone(), timezone: t.timezone.clone() },
        }
    }
}

/// Per-function concurrency cap enforced by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent runs.
    pub limit: u32,
    /// Expression partitioning the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Per-function rate limit enforced by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Runs allowed per period.
    pub limit: u32,
    /// Period as a duration string, e.g. `1m`.
    pub period: String,
    /// Expression partitioning the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Declarative configuration of a registered function.
///
/// ```
/// use std::time::Duration;
/// use fngate_core::{FunctionConfig, Trigger};
///
/// let config = FunctionConfig::new("send-welcome-email")
///     .name("Send welcome email")
///     .trigger(Trigger::event("user.created"))
///     .retries(5)
///     .timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    /// Unique kebab-case id.
    pub id: String,
    /// Human-readable name.
    pub name: Option<String>,
    /// At least one trigger.
    pub triggers: Vec<Trigger>,
    /// Concurrency cap.
    pub concurrency: Option<ConcurrencyConfig>,
    /// Rate limit.
    pub rate_limit: Option<RateLimitConfig>,
    /// Platform retries, 0 to 10.
    pub retries: Option<u32>,
    /// Advertised execution timeout, 1s to 300s.
    pub timeout: Option<Duration>,
}

impl FunctionConfig {
    /// Starts a configuration with no triggers.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            triggers: Vec::new(),
            concurrency: None,
            rate_limit: None,
            retries: None,
            timeout: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Adds an event trigger.
    #[must_use]
    pub fn on_event(self, event: impl Into<String>) -> Self {
        self.trigger(Trigger::event(event))
    }

    /// Adds a cron trigger.
    #[must_use]
    pub fn on_cron(self, expression: impl Into<String>) -> Self {
        self.trigger(Trigger::cron(expression))
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub fn concurrency(mut self, limit: u32, key: Option<String>) -> Self {
        self.concurrency = Some(ConcurrencyConfig { limit, key });
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn rate_limit(mut self, limit: u32, period: impl Into<String>) -> Self {
        self.rate_limit = Some(RateLimitConfig { limit, period: period.into(), key: None });
        self
    }

    /// Sets platform retries.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the advertised timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Configured retries or [`DEFAULT_RETRIES`].
    pub fn effective_retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }

    /// Configured timeout or [`DEFAULT_TIMEOUT`].
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Checks id format, triggers and numeric ranges.
    ///
    /// # Errors
    ///
    /// Returns [`FunctionError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), FunctionError> {
        if !is_valid_function_id(&self.id) {
            return Err(FunctionError::invalid_config(
                &self.id,
                "id must be kebab-case (lowercase letters, digits and single dashes)",
            ));
        }

        if self.triggers.is_empty() {
            return Err(FunctionError::invalid_config(&self.id, "at least one trigger is required"));
        }

        for trigger in &self.triggers {
            trigger.check().map_err(|message| FunctionError::invalid_config(&self.id, message))?;
        }

        if let Some(retries) = self.retries {
            if retries > MAX_RETRIES {
                return Err(FunctionError::invalid_config(
                    &self.id,
                    format!("retries must be between 0 and {MAX_RETRIES}, got {retries}"),
                ));
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout < MIN_TIMEOUT || timeout > MAX_TIMEOUT {
                return Err(FunctionError::invalid_config(
                    &self.id,
                    format!(
                        "timeout must be between {}ms and {}ms, got {}ms",
                        MIN_TIMEOUT.as_millis(),
                        MAX_TIMEOUT.as_millis(),
                        timeout.as_millis()
                    ),
                ));
            }
        }

        if let Some(concurrency) = &self.concurrency {
            if concurrency.limit == 0 {
                return Err(FunctionError::invalid_config(&self.id, "concurrency limit must be positive"));
            }
        }

        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.limit == 0 || rate_limit.period.trim().is_empty() {
                return Err(FunctionError::invalid_config(
                    &self.id,
                    "rate limit needs a positive limit and a period",
                ));
            }
        }

        Ok(())
    }
}

/// Trigger as advertised to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTrigger {
    /// Event trigger.
    Event {
        /// Event name
        event: String,
        /// Filter expression
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },
    /// Cron trigger.
    Cron {
        /// Cron expression
        cron: String,
        /// Timezone
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

/// Runtime location of a function's single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id.
    pub id: String,
    /// Step name.
    pub name: String,
    /// Where the platform calls back.
    pub runtime: StepRuntime,
}

/// HTTP callback target for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRuntime {
    /// Runtime type, always `http`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Callback url.
    pub url: String,
}

/// Retry policy as advertised to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDefinition {
    /// Number of retries.
    pub attempts: u32,
}

/// One function as reported in the sync (PUT) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    /// Function id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Wire triggers in declaration order.
    pub triggers: Vec<WireTrigger>,
    /// Concurrency cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<ConcurrencyConfig>,
    /// Rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Step callbacks, present when a serve origin is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<BTreeMap<String, StepDefinition>>,
    /// Retry policy.
    pub retries: RetryDefinition,
    /// Advertised timeout in milliseconds.
    pub timeout_ms: u64,
}

impl FunctionDefinition {
    /// Builds the definition for `config`.
    ///
    /// `serve_url` is the absolute url of the webhook endpoint; when given,
    /// the definition carries a `step` callback pointing at it.
    pub fn from_config(app_id: &str, config: &FunctionConfig, serve_url: Option<&str>) -> Self {
        let steps = serve_url.map(|url| {
            let step = StepDefinition {
                id: "step".to_string(),
                name: "step".to_string(),
                runtime: StepRuntime {
                    kind: "http".to_string(),
                    url: format!("{url}?fnId={}&appId={app_id}&stepId=step", config.id),
                },
            };
            BTreeMap::from([("step".to_string(), step)])
        });

        Self {
            id: config.id.clone(),
            name: config.display_name().to_string(),
            triggers: config.triggers.iter().map(Trigger::to_wire).collect(),
            concurrency: config.concurrency.clone(),
            rate_limit: config.rate_limit.clone(),
            steps,
            retries: RetryDefinition { attempts: config.effective_retries() },
            timeout_ms: u64::try_from(config.effective_timeout().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base() -> FunctionConfig {
        FunctionConfig::new("process-order").on_event("order.created")
    }

    #[test]
    fn defaults_apply() {
        let config = base();
        assert_eq!(config.effective_retries(), 3);
        assert_eq!(config.effective_timeout(), Duration::from_secs(30));
        assert_eq!(config.display_name(), "process-order");
    }

    #[test]
    fn rejects_non_kebab_ids() {
        for id in ["ProcessOrder", "process_order", "process--order", "-x", ""] {
            let mut config = base();
            config.id = id.to_string();
            assert!(
                matches!(config.validate(), Err(FunctionError::InvalidConfig { .. })),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_missing_triggers() {
        let error = FunctionConfig::new("no-triggers").validate().unwrap_err();
        assert!(error.to_string().contains("at least one trigger"));
    }

    #[test]
    fn retry_and_timeout_bounds() {
        assert!(base().retries(0).validate().is_ok());
        assert!(base().retries(10).validate().is_ok());
        assert!(base().retries(11).validate().is_err());

        assert!(base().timeout(Duration::from_millis(1_000)).validate().is_ok());
        assert!(base().timeout(Duration::from_millis(300_000)).validate().is_ok());
        assert!(base().timeout(Duration::from_millis(999)).validate().is_err());
        assert!(base().timeout(Duration::from_millis(300_001)).validate().is_err());
    }

    #[test]
    fn malformed_triggers_are_rejected() {
        assert!(FunctionConfig::new("a").on_event("  ").validate().is_err());
        assert!(FunctionConfig::new("a").on_cron("* * *").validate().is_err());
        assert!(FunctionConfig::new("a").on_cron("0 9 * * 1").validate().is_ok());
        assert!(FunctionConfig::new("a").on_cron("0 0 9 * * 1").validate().is_ok());
    }

    #[test]
    fn wire_triggers_rename_condition() {
        let wire = serde_json::to_value(Trigger::event_if("a.b", "event.data.x > 1").to_wire()).unwrap();
        assert_eq!(wire, json!({"event": "a.b", "expression": "event.data.x > 1"}));

        let wire = serde_json::to_value(Trigger::cron_in("0 * * * *", "UTC").to_wire()).unwrap();
        assert_eq!(wire, json!({"cron": "0 * * * *", "timezone": "UTC"}));
    }

    #[test]
    fn definition_includes_step_url_when_served() {
        let definition =
            FunctionDefinition::from_config("shop", &base(), Some("https://shop.example/api/inngest"));
        let step = &definition.steps.as_ref().unwrap()["step"];

        assert_eq!(step.runtime.kind, "http");
        assert_eq!(
            step.runtime.url,
            "https://shop.example/api/inngest?fnId=process-order&appId=shop&stepId=step"
        );
        assert!(FunctionDefinition::from_config("shop", &base(), None).steps.is_none());
    }
}
