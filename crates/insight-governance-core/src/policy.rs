// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Policy engine.
//!
//! [`evaluate`] is a pure function of a contract, its context, the context
//! meta, the rollout state, and the wall-clock.  It computes a severity and a
//! verdict:
//!
//! * **Severity** is the maximum of any severity the context states outright
//!   and a keyword floor inferred from the contract text.
//! * **Reasons** accumulate independently; one failing check never hides
//!   another.
//! * **Verdict** is `block` if any reason is present, `allow` if severity is
//!   info, otherwise `warn`.
//!
//! The keyword floor is a best-effort heuristic over generated prose.  It
//! raises severity when alarming vocabulary appears and can be defeated by
//! paraphrase, so it is never the only source of severity a caller should
//! rely on; structured risk signals in the context take precedence when they
//! are higher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{first_finite, lookup};
use crate::registry::FeatureConfig;
use crate::types::{
    ContextMeta, InsightContract, PolicyDecision, PolicyReason, Severity, ThresholdSnapshot,
    Verdict,
};

/// Context fields holding a data-coverage fraction, in priority order.
/// `riskSnapshot.coverage` is rule confidence, not data coverage, and is
/// not read here.
pub(crate) const COVERAGE_PATHS: &[&str] = &["dataCoverage", "data_coverage", "coverage"];

/// Context fields holding a single severity label, in priority order.
const SEVERITY_PATHS: &[&str] = &["severity", "riskSeverity", "riskSnapshot.severity"];

/// Context fields holding a list of signals with their own severities.
const SIGNAL_LIST_PATHS: &[&str] = &["riskSignals", "signals"];

const CRITICAL_KEYWORDS: &[&str] = &["liquidat", "insolven", "exploit", "critical", "halt"];
const WARNING_KEYWORDS: &[&str] = &["risk", "drawdown", "leverag", "funding", "concentrat", "stop"];

/// Output of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub severity: Severity,
    pub verdict: Verdict,
    pub policy: PolicyDecision,
}

/// Evaluate a contract against the feature's thresholds.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::context::build_context_meta;
/// use insight_governance_core::policy::evaluate;
/// use insight_governance_core::registry::{lookup, FeatureId};
/// use insight_governance_core::types::{InsightContract, PolicyReason, Verdict};
///
/// let config = lookup(FeatureId::PortfolioOverview);
/// let context = serde_json::json!({ "snapshotTs": 1_000 });
/// let meta = build_context_meta(&context, "hash", 1_000);
/// let contract = InsightContract {
///     schema_version: 1,
///     risk: "Nothing notable.".into(),
///     action: "Hold.".into(),
///     confidence: 0.1,
///     evidence: vec![],
///     expires_at: 2_000,
/// };
///
/// let outcome = evaluate(config, &contract, &context, &meta, true, 1_000);
/// assert_eq!(outcome.verdict, Verdict::Block);
/// assert!(outcome.policy.has_reason(PolicyReason::LowConfidence));
/// ```
pub fn evaluate(
    config: &FeatureConfig,
    contract: &InsightContract,
    context: &Value,
    meta: &ContextMeta,
    rollout_allowed: bool,
    now_ms: u64,
) -> PolicyOutcome {
    let thresholds = config.thresholds;
    let context_age_ms = now_ms.saturating_sub(meta.snapshot_ts);
    let coverage = resolve_coverage(context);
    let severity = context_severity(context)
        .unwrap_or(Severity::Info)
        .max(infer_text_severity(&contract.risk, &contract.action));

    let mut reasons = Vec::new();
    if !rollout_allowed {
        reasons.push(PolicyReason::RolloutDisabled);
    }
    if contract.confidence < thresholds.min_confidence {
        reasons.push(PolicyReason::LowConfidence);
    }
    if context_age_ms > thresholds.max_context_age_ms {
        reasons.push(PolicyReason::StaleContext);
    }
    if coverage < thresholds.min_data_coverage {
        reasons.push(PolicyReason::IncompleteCoverage);
    }
    // Evidence only becomes mandatory once the signal is non-trivial.
    if severity != Severity::Info && contract.evidence.len() < thresholds.min_evidence_items {
        reasons.push(PolicyReason::MissingEvidence);
    }

    let verdict = if !reasons.is_empty() {
        Verdict::Block
    } else if severity == Severity::Info {
        Verdict::Allow
    } else {
        Verdict::Warn
    };

    PolicyOutcome {
        severity,
        verdict,
        policy: PolicyDecision {
            verdict,
            reasons,
            threshold_snapshot: ThresholdSnapshot {
                thresholds,
                confidence: contract.confidence,
                context_age_ms,
                coverage,
                evidence_items: contract.evidence.len(),
            },
        },
    }
}

/// First finite coverage value in the context, as a fraction.  Missing
/// coverage counts as complete.
pub fn resolve_coverage(context: &Value) -> f64 {
    match first_finite(context, COVERAGE_PATHS) {
        Some(value) if value > 1.0 => (value / 100.0).clamp(0.0, 1.0),
        Some(value) => value.max(0.0),
        None => 1.0,
    }
}

/// Highest severity the context states explicitly, either directly or across
/// a list of supplied signals.
pub fn context_severity(context: &Value) -> Option<Severity> {
    let direct = SEVERITY_PATHS
        .iter()
        .filter_map(|path| lookup(context, path))
        .filter_map(Value::as_str)
        .filter_map(Severity::parse_loose)
        .max();

    let listed = SIGNAL_LIST_PATHS
        .iter()
        .filter_map(|path| lookup(context, path))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|signal| lookup(signal, "severity"))
        .filter_map(Value::as_str)
        .filter_map(Severity::parse_loose)
        .max();

    direct.max(listed)
}

/// Keyword floor over the contract text.  Matching is by word prefix, so
/// `liquidation`, `liquidated` and `liquidations` all count.
pub fn infer_text_severity(risk: &str, action: &str) -> Severity {
    let text = format!("{risk} {action}").to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    let mentions = |keywords: &[&str]| {
        words
            .iter()
            .any(|word| keywords.iter().any(|keyword| word.starts_with(keyword)))
    };

    if mentions(CRITICAL_KEYWORDS) {
        Severity::Critical
    } else if mentions(WARNING_KEYWORDS) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
