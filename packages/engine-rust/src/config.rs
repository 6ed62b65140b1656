//! Engine, activation, and logging configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Region used when no request attribute or scope names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Account id reported in owner fields and ARNs.
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Process-level settings of a [`crate::MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback region when neither the request nor the active scope names one.
    pub default_region: String,
    /// Account id handed to handlers through their context.
    pub account_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads `AWS_DEFAULT_REGION` (then `AWS_REGION`) and `CLOUDMOCK_ACCOUNT_ID`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(region) = non_empty("AWS_DEFAULT_REGION").or_else(|| non_empty("AWS_REGION")) {
            config.default_region = region;
        }
        if let Some(account) = non_empty("CLOUDMOCK_ACCOUNT_ID") {
            config.account_id = account;
        }
        config
    }
}

/// Options of one activation scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Services to intercept. `None` intercepts every registered service.
    pub services: Option<BTreeSet<String>>,
    /// Region used for requests that carry no region of their own.
    pub region_default: Option<String>,
    /// Start the scope from empty backend state.
    pub reset_on_enter: bool,
    /// Discard the scope's backend state when it exits.
    pub reset_on_exit: bool,
    /// Activate interception for every thread, not only the entering one.
    pub process_wide: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            services: None,
            region_default: None,
            reset_on_enter: true,
            reset_on_exit: true,
            process_wide: false,
        }
    }
}

impl MockConfig {
    /// Restricts the scope to the given services.
    #[must_use]
    pub fn services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = Some(services.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn region_default(mut self, region: impl Into<String>) -> Self {
        self.region_default = Some(region.into());
        self
    }

    #[must_use]
    pub fn reset_on_enter(mut self, reset: bool) -> Self {
        self.reset_on_enter = reset;
        self
    }

    #[must_use]
    pub fn reset_on_exit(mut self, reset: bool) -> Self {
        self.reset_on_exit = reset;
        self
    }

    #[must_use]
    pub fn process_wide(mut self, process_wide: bool) -> Self {
        self.process_wide = process_wide;
        self
    }
}

/// Settings for [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_region, "us-east-1");
        assert_eq!(config.account_id, "123456789012");
    }

    #[test]
    fn default_region_env_wins_over_region() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("AWS_REGION", "ap-south-1"),
        ]));
        assert_eq!(config.default_region, "eu-west-1");

        let config = EngineConfig::from_lookup(lookup(&[("AWS_REGION", "ap-south-1")]));
        assert_eq!(config.default_region, "ap-south-1");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("AWS_DEFAULT_REGION", " "),
            ("CLOUDMOCK_ACCOUNT_ID", "000000000001"),
        ]));
        assert_eq!(config.default_region, "us-east-1");
        assert_eq!(config.account_id, "000000000001");
    }

    #[test]
    fn mock_config_defaults_reset_both_ways() {
        let config = MockConfig::default();
        assert!(config.services.is_none());
        assert!(config.reset_on_enter);
        assert!(config.reset_on_exit);
        assert!(!config.process_wide);
    }

    #[test]
    fn mock_config_deserializes_partial_documents() {
        let config: MockConfig =
            serde_json::from_str(r#"{"services": ["ec2"], "reset_on_exit": false}"#).unwrap();
        assert_eq!(config.services, Some(BTreeSet::from(["ec2".to_string()])));
        assert!(config.reset_on_enter);
        assert!(!config.reset_on_exit);
    }

    #[test]
    fn log_config_default_filter_is_info() {
        assert_eq!(LogConfig::default().filter, "info");
    }
}
