// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across the insight governance layer.
//!
//! All persisted types implement [`Clone`], [`Debug`], [`serde::Serialize`],
//! and [`serde::Deserialize`] so they can be written to any store backend and
//! returned to callers as JSON without additional conversion steps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::FeatureId;

/// Schema version stamped on every [`InsightContract`].
pub const CONTRACT_SCHEMA_VERSION: u32 = 1;

/// Version of the [`ContextMeta`] layout.
pub const CONTEXT_META_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Severity / verdict
// ---------------------------------------------------------------------------

/// Ordered classification of how consequential a signal is.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::types::Severity;
///
/// assert!(Severity::Critical > Severity::Warning);
/// assert_eq!(Severity::Info.max(Severity::Warning), Severity::Warning);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info     => "info",
            Severity::Warning  => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse used on untrusted context values.
    ///
    /// Accepts the canonical names plus common synonyms (`warn`, `high`,
    /// `severe`, ...).  Unknown labels yield `None`.
    pub fn parse_loose(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "info" | "low" | "none" | "ok" => Some(Severity::Info),
            "warning" | "warn" | "medium" | "elevated" | "high" => Some(Severity::Warning),
            "critical" | "severe" | "danger" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a signal may be shown as-is, shown with caution, or suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Warn,
    Block,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Warn  => "warn",
            Verdict::Block => "block",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The canonical structured advisory object.
///
/// Invariants (upheld by the normalizer): `risk` and `action` are non-empty
/// after trimming, `confidence` lies in `[0, 1]`, `evidence` holds at most
/// four items, and `expires_at` is not earlier than the creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightContract {
    pub schema_version: u32,
    pub risk: String,
    pub action: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
    /// Unix epoch milliseconds after which the contract is stale.
    pub expires_at: u64,
}

impl InsightContract {
    /// Check the structural invariants against a creation time.
    pub fn satisfies_invariants(&self, created_at_ms: u64) -> bool {
        !self.risk.trim().is_empty()
            && !self.action.trim().is_empty()
            && (0.0..=1.0).contains(&self.confidence)
            && self.evidence.len() <= crate::normalizer::MAX_EVIDENCE_ITEMS
            && self.expires_at >= created_at_ms
    }
}

/// Provenance / quality tier of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Parsed straight from structured provider output.
    Validated,
    /// Recovered from labelled lines or sentences.
    Repaired,
    /// Built from the feature's static fallback template.
    Fallback,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Validated => "validated",
            ContractStatus::Repaired  => "repaired",
            ContractStatus::Fallback  => "fallback",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Context meta
// ---------------------------------------------------------------------------

/// Observation metadata derived from a request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMeta {
    pub context_version: u32,
    /// Unix epoch milliseconds at which the observation was captured.
    pub snapshot_ts: u64,
    /// Content fingerprint of the serialised context.
    pub context_hash: String,
    /// At most eight short provenance tokens.
    pub source_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Per-feature guardrail thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyThresholds {
    pub min_confidence: f64,
    pub max_context_age_ms: u64,
    pub min_evidence_items: usize,
    pub min_data_coverage: f64,
}

/// Named cause contributing to a block verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyReason {
    RolloutDisabled,
    LowConfidence,
    StaleContext,
    IncompleteCoverage,
    MissingEvidence,
}

impl PolicyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyReason::RolloutDisabled    => "rollout_disabled",
            PolicyReason::LowConfidence      => "low_confidence",
            PolicyReason::StaleContext       => "stale_context",
            PolicyReason::IncompleteCoverage => "incomplete_coverage",
            PolicyReason::MissingEvidence    => "missing_evidence",
        }
    }
}

impl fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds in force for one evaluation plus the observed values they were
/// compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSnapshot {
    pub thresholds: PolicyThresholds,
    pub confidence: f64,
    pub context_age_ms: u64,
    pub coverage: f64,
    pub evidence_items: usize,
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub verdict: Verdict,
    /// Sorted, duplicate-free.
    pub reasons: Vec<PolicyReason>,
    pub threshold_snapshot: ThresholdSnapshot,
}

impl PolicyDecision {
    pub fn has_reason(&self, reason: PolicyReason) -> bool {
        self.reasons.contains(&reason)
    }
}

// ---------------------------------------------------------------------------
// Store records
// ---------------------------------------------------------------------------

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Frozen generation result kept in the cache.
///
/// Only the contract content is frozen.  The policy verdict is recomputed on
/// every cache hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedInsight {
    pub contract: InsightContract,
    pub status: ContractStatus,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Cache record keyed by `"feature:contextHash"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub created_at: u64,
    pub insight: CachedInsight,
}

/// Per-feature, per-UTC-day generation counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCounter {
    /// UTC day in `YYYY-MM-DD` form.
    pub date: String,
    pub count: u32,
}

/// Terminal state of one request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    RuntimeDisabled,
    RolloutBlocked,
    CacheHit,
    BudgetExceeded,
    Generated,
}

impl RequestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOutcome::RuntimeDisabled => "runtime_disabled",
            RequestOutcome::RolloutBlocked  => "rollout_blocked",
            RequestOutcome::CacheHit        => "cache_hit",
            RequestOutcome::BudgetExceeded  => "budget_exceeded",
            RequestOutcome::Generated       => "generated",
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub feature: FeatureId,
    pub outcome: RequestOutcome,
    pub requested_at: u64,
    pub completed_at: u64,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub contract_status: ContractStatus,
    pub confidence: f64,
    pub severity: Severity,
    pub verdict: Verdict,
    pub policy_reasons: Vec<PolicyReason>,
    pub context_version: u32,
    pub context_hash: String,
    pub snapshot_ts: u64,
    pub source_ids: Vec<String>,
}

/// Filter used to narrow the results of [`AuditLogger::query`].
///
/// [`AuditLogger::query`]: crate::audit::AuditLogger::query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    /// If set, only return entries for this feature.
    pub feature: Option<FeatureId>,
    /// If set, only return entries with this outcome.
    pub outcome: Option<RequestOutcome>,
    /// If set, only return entries completed at or after this epoch ms.
    pub since_ms: Option<u64>,
    /// If set, only return entries completed at or before this epoch ms.
    pub until_ms: Option<u64>,
    /// If set, limit the number of returned entries (newest kept).
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(feature) = self.feature {
            if entry.feature != feature {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }
        if let Some(since_ms) = self.since_ms {
            if entry.completed_at < since_ms {
                return false;
            }
        }
        if let Some(until_ms) = self.until_ms {
            if entry.completed_at > until_ms {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Orchestrator I/O
// ---------------------------------------------------------------------------

/// A request submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub feature: FeatureId,
    /// Opaque, caller-supplied context tree.
    pub context: serde_json::Value,
    /// Caller-supplied fingerprint.  Computed from `context` when absent.
    #[serde(default)]
    pub context_hash: Option<String>,
}

impl InsightRequest {
    pub fn new(feature: FeatureId, context: serde_json::Value) -> Self {
        Self { feature, context, context_hash: None }
    }
}

/// Enriched response returned for every request lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightResponse {
    pub feature: FeatureId,
    pub outcome: RequestOutcome,
    pub contract: InsightContract,
    pub status: ContractStatus,
    pub severity: Severity,
    pub verdict: Verdict,
    pub policy: PolicyDecision,
    pub context_meta: ContextMeta,
    pub cached: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub generated_at: u64,
}
