//! Configuration for the form engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the form engine and its async edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaybillConfig {
    /// Draft persistence
    pub drafts: DraftConfig,
    /// Generated code lookups
    pub lookup: LookupConfig,
    /// Submission
    pub submit: SubmitConfig,
    /// Vehicle transaction form
    pub transaction: TransactionConfig,
    /// Customer form
    pub customer: CustomerConfig,
}

impl WaybillConfig {
    /// Load config from YAML. Missing sections keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Draft persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// Quiet period after the last edit before a draft is written (ms)
    pub quiet_period_ms: u64,
    /// Directory for file-backed drafts, in-memory when unset
    pub directory: Option<PathBuf>,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 800,
            directory: None,
        }
    }
}

impl DraftConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Lookup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Delay before a lookup is sent, restarted by every seed change (ms)
    pub debounce_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self { debounce_ms: 400 }
    }
}

impl LookupConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// What the form holds after a successful submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterSave {
    /// Start over with an empty form
    #[default]
    Fresh,
    /// Keep the saved values, now editing the saved record
    PostSave,
}

/// Submission configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Timeout for each collaborator call (ms)
    pub request_timeout_ms: u64,
    /// Form reset after a successful submit
    pub after_save: AfterSave,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            after_save: AfterSave::Fresh,
        }
    }
}

impl SubmitConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Vehicle transaction form configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Duty hours above this raise an advisory
    pub max_duty_hours: f64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_duty_hours: 16.0,
        }
    }
}

/// Customer form configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerConfig {
    /// Longest credit period offered (days)
    pub max_credit_days: u32,
}

impl Default for CustomerConfig {
    fn default() -> Self {
        Self {
            max_credit_days: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WaybillConfig::default();
        assert_eq!(config.drafts.quiet_period(), Duration::from_millis(800));
        assert_eq!(config.lookup.debounce_ms, 400);
        assert_eq!(config.submit.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.submit.after_save, AfterSave::Fresh);
        assert_eq!(config.customer.max_credit_days, 180);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = WaybillConfig::default();
        config.drafts.directory = Some(PathBuf::from("/var/lib/waybill/drafts"));
        config.submit.after_save = AfterSave::PostSave;

        let yaml = config.to_yaml().unwrap();
        let parsed = WaybillConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let parsed = WaybillConfig::from_yaml("transaction:\n  max_duty_hours: 12\n").unwrap();
        assert_eq!(parsed.transaction.max_duty_hours, 12.0);
        assert_eq!(parsed.drafts.quiet_period_ms, 800);
    }
}
