// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Orchestrator-level configuration.
//!
//! [`OrchestratorConfig`] is the single entry point for tuning the
//! orchestrator at construction time.  `OrchestratorConfig::default()` is
//! always a valid starting point.  Per-feature settings live in the static
//! registry, not here.

use serde::{Deserialize, Serialize};

/// Top-level configuration for [`InsightOrchestrator`].
///
/// [`InsightOrchestrator`]: crate::orchestrator::InsightOrchestrator
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::config::OrchestratorConfig;
///
/// let config = OrchestratorConfig {
///     provider_timeout_ms: 5_000,
///     ..OrchestratorConfig::default()
/// };
/// assert!(config.runtime_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Initial value of the global runtime flag when the store holds none.
    /// Defaults to `true`.
    pub runtime_enabled: bool,

    /// Upper bound on one provider call, blocking or streaming.
    /// Defaults to 22 000 ms.
    pub provider_timeout_ms: u64,

    /// How long a request key that just failed is refused before it may be
    /// issued again.  Defaults to 15 000 ms.
    pub failure_cooldown_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runtime_enabled: true,
            provider_timeout_ms: 22_000,
            failure_cooldown_ms: 15_000,
        }
    }
}
