// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Configuration loader for [`InsightOrchestrator`].
//!
//! [`InsightOrchestrator`]: crate::orchestrator::InsightOrchestrator
//!
//! Supports two load strategies:
//!
//! 1. **TOML file** - [`load_config`] reads and deserialises a TOML file into
//!    an [`InsightConfig`].
//! 2. **Environment variables** - [`load_config_from_env`] reads
//!    `INSIGHT_`-prefixed environment variables.
//!
//! # File format
//!
//! ```toml
//! runtime_enabled     = true
//! provider_timeout_ms = 22000
//! failure_cooldown_ms = 15000
//! disabled_features   = ["transfer_review"]
//!
//! [rollout_overrides]
//! funding_watch = 25
//! ```
//!
//! # Environment variables
//!
//! | Variable                      | Type        | Default |
//! |-------------------------------|-------------|---------|
//! | `INSIGHT_RUNTIME_ENABLED`     | boolean     | true    |
//! | `INSIGHT_PROVIDER_TIMEOUT_MS` | integer     | 22000   |
//! | `INSIGHT_FAILURE_COOLDOWN_MS` | integer     | 15000   |
//! | `INSIGHT_ROLLOUT_<FEATURE>`   | integer 0–100 | registry default |
//!
//! `<FEATURE>` is the upper-cased feature id, e.g.
//! `INSIGHT_ROLLOUT_FUNDING_WATCH`.

// Only compile this module when the "config-loader" feature is enabled.
#![cfg(feature = "config-loader")]

use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OrchestratorConfig;
use crate::registry::FeatureId;
use crate::storage::InsightStore;

// ---------------------------------------------------------------------------
// InsightConfig
// ---------------------------------------------------------------------------

/// Flat, serialisation-friendly configuration.
///
/// Use [`Into<OrchestratorConfig>`] for the engine-level part and
/// [`InsightConfig::apply_to_store`] for the persisted feature flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightConfig {
    #[serde(default = "default_runtime_enabled")]
    pub runtime_enabled: bool,

    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    #[serde(default = "default_failure_cooldown_ms")]
    pub failure_cooldown_ms: u64,

    /// Feature → rollout percentage (0–100).
    #[serde(default)]
    pub rollout_overrides: BTreeMap<FeatureId, u8>,

    #[serde(default)]
    pub disabled_features: Vec<FeatureId>,
}

fn default_runtime_enabled() -> bool { true }
fn default_provider_timeout_ms() -> u64 { OrchestratorConfig::default().provider_timeout_ms }
fn default_failure_cooldown_ms() -> u64 { OrchestratorConfig::default().failure_cooldown_ms }

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            runtime_enabled:     default_runtime_enabled(),
            provider_timeout_ms: default_provider_timeout_ms(),
            failure_cooldown_ms: default_failure_cooldown_ms(),
            rollout_overrides:   BTreeMap::new(),
            disabled_features:   Vec::new(),
        }
    }
}

impl InsightConfig {
    /// Persist the rollout overrides and disabled features into `store`.
    ///
    /// Features that are not listed keep whatever the store already holds.
    pub fn apply_to_store<S: InsightStore>(&self, store: &mut S) {
        for (&feature, &percent) in &self.rollout_overrides {
            store.set_rollout_percent(feature, percent);
        }
        for &feature in &self.disabled_features {
            store.set_feature_enabled(feature, false);
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if let Some((feature, percent)) = self.rollout_overrides.iter().find(|(_, percent)| **percent > 100) {
            return Err(ConfigError::InvalidRange {
                field: format!("rollout_overrides.{feature}"),
                value: percent.to_string(),
                reason: "must be in range 0–100".into(),
            });
        }
        Ok(self)
    }
}

impl From<InsightConfig> for OrchestratorConfig {
    fn from(config: InsightConfig) -> Self {
        Self {
            runtime_enabled: config.runtime_enabled,
            provider_timeout_ms: config.provider_timeout_ms,
            failure_cooldown_ms: config.failure_cooldown_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file \"{path}\": {source}")]
    FileRead { path: String, source: std::io::Error },

    #[error("failed to parse TOML config: {source}")]
    TomlParse { source: toml::de::Error },

    #[error("field \"{field}\": cannot parse \"{value}\": {reason}")]
    ParseField { field: String, value: String, reason: String },

    #[error("field \"{field}\": value \"{value}\" out of range: {reason}")]
    InvalidRange { field: String, value: String, reason: String },
}

// ---------------------------------------------------------------------------
// TOML loader
// ---------------------------------------------------------------------------

/// Load an [`InsightConfig`] from a TOML file.
///
/// # Errors
///
/// [`ConfigError::FileRead`] if the file cannot be read,
/// [`ConfigError::TomlParse`] if it does not match the schema, and
/// [`ConfigError::InvalidRange`] for a rollout override above 100.
///
/// # Example
///
/// ```rust,no_run
/// use insight_governance_core::config_loader::load_config;
///
/// let config = load_config("/etc/insight/governance.toml").unwrap();
/// println!("timeout: {} ms", config.provider_timeout_ms);
/// ```
pub fn load_config(path: &str) -> Result<InsightConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_owned(),
        source,
    })?;
    parse_config(&content)
}

/// Parse TOML text into an [`InsightConfig`].
pub fn parse_config(content: &str) -> Result<InsightConfig, ConfigError> {
    toml::from_str::<InsightConfig>(content)
        .map_err(|source| ConfigError::TomlParse { source })?
        .validate()
}

// ---------------------------------------------------------------------------
// Environment variable loader
// ---------------------------------------------------------------------------

/// Load an [`InsightConfig`] from `INSIGHT_`-prefixed environment variables.
///
/// Unset variables fall back to their defaults.
///
/// # Errors
///
/// [`ConfigError::ParseField`] for a value that cannot be parsed and
/// [`ConfigError::InvalidRange`] for a rollout percentage above 100.
pub fn load_config_from_env() -> Result<InsightConfig, ConfigError> {
    load_config_from_lookup(|key| std::env::var(key).ok())
}

/// [`load_config_from_env`] over an arbitrary variable source.
pub fn load_config_from_lookup<F>(lookup: F) -> Result<InsightConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let runtime_enabled = read_bool(&lookup, "INSIGHT_RUNTIME_ENABLED", default_runtime_enabled())?;
    let provider_timeout_ms =
        read_u64(&lookup, "INSIGHT_PROVIDER_TIMEOUT_MS", default_provider_timeout_ms())?;
    let failure_cooldown_ms =
        read_u64(&lookup, "INSIGHT_FAILURE_COOLDOWN_MS", default_failure_cooldown_ms())?;

    let mut rollout_overrides = BTreeMap::new();
    for feature in FeatureId::ALL {
        let key = format!("INSIGHT_ROLLOUT_{}", feature.as_str().to_ascii_uppercase());
        let Some(raw) = lookup(&key) else { continue };
        let percent = raw.trim().parse::<u8>().map_err(|source| ConfigError::ParseField {
            field: key.clone(),
            value: raw.clone(),
            reason: source.to_string(),
        })?;
        if percent > 100 {
            return Err(ConfigError::InvalidRange {
                field: key,
                value: raw,
                reason: "must be in range 0–100".into(),
            });
        }
        rollout_overrides.insert(feature, percent);
    }

    Ok(InsightConfig {
        runtime_enabled,
        provider_timeout_ms,
        failure_cooldown_ms,
        rollout_overrides,
        disabled_features: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val.trim().parse::<u64>().map_err(|source| ConfigError::ParseField {
            field: key.to_owned(),
            value: val.clone(),
            reason: source.to_string(),
        }),
        None => Ok(default),
    }
}

fn read_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true"  | "1" | "yes" | "on"  => Ok(true),
            "false" | "0" | "no"  | "off" => Ok(false),
            other => Err(ConfigError::ParseField {
                field: key.to_owned(),
                value: other.to_owned(),
                reason: "expected one of: true/false, 1/0, yes/no, on/off".into(),
            }),
        },
        None => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::storage::InMemoryStorage;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, InsightConfig::default());
        assert_eq!(OrchestratorConfig::from(config), OrchestratorConfig::default());
    }

    #[test]
    fn file_overrides_are_applied_to_the_store() {
        let config = parse_config(
            r#"
            provider_timeout_ms = 5000
            disabled_features = ["transfer_review"]

            [rollout_overrides]
            funding_watch = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.provider_timeout_ms, 5_000);

        let mut store = InMemoryStorage::new();
        config.apply_to_store(&mut store);
        assert_eq!(store.rollout_percent(FeatureId::FundingWatch), Some(25));
        assert_eq!(store.feature_enabled(FeatureId::TransferReview), Some(false));
        assert_eq!(store.feature_enabled(FeatureId::PositionRisk), None);
    }

    #[test]
    fn out_of_range_rollout_in_file_is_rejected() {
        let err = parse_config("[rollout_overrides]\nposition_risk = 150\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { ref field, .. } if field == "rollout_overrides.position_risk"));
    }

    #[test]
    fn unknown_feature_in_file_is_a_parse_error() {
        let err = parse_config("disabled_features = [\"nope\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn env_variables_override_defaults() {
        let config = load_config_from_lookup(vars(&[
            ("INSIGHT_RUNTIME_ENABLED", "off"),
            ("INSIGHT_FAILURE_COOLDOWN_MS", " 3000 "),
            ("INSIGHT_ROLLOUT_FUNDING_WATCH", "10"),
        ]))
        .unwrap();
        assert!(!config.runtime_enabled);
        assert_eq!(config.failure_cooldown_ms, 3_000);
        assert_eq!(config.provider_timeout_ms, 22_000);
        assert_eq!(config.rollout_overrides.get(&FeatureId::FundingWatch), Some(&10));
        assert_eq!(config.rollout_overrides.len(), 1);
    }

    #[test]
    fn env_errors_name_the_variable() {
        let err = load_config_from_lookup(vars(&[("INSIGHT_PROVIDER_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseField { ref field, .. } if field == "INSIGHT_PROVIDER_TIMEOUT_MS"));

        let err = load_config_from_lookup(vars(&[("INSIGHT_ROLLOUT_POSITION_RISK", "101")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { .. }));

        let err = load_config_from_lookup(vars(&[("INSIGHT_RUNTIME_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseField { .. }));
    }
}
