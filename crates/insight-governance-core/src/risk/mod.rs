// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Deterministic risk engine.
//!
//! Six independent, pure rules score a [`PortfolioSnapshot`].  The results are
//! aggregated into a [`RiskSnapshot`] that can be folded back into a request
//! context, where the policy engine picks the severities up.
//!
//! Signals are cheap to derive and are recomputed on every call; nothing here
//! is cached.

pub mod input;
pub mod rules;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use input::{Holding, PortfolioSnapshot, Position, Side, Transfer};

use crate::types::{Severity, Verdict};

/// Snapshots older than this are flagged stale.
pub const STALE_AFTER_MS: u64 = 12 * 60 * 1_000;

/// Number of signals surfaced for prioritised display.
pub const TOP_SIGNAL_COUNT: usize = 3;

/// Identifier of a risk rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRule {
    Concentration,
    LeverageStress,
    StopCoverage,
    FundingDrag,
    TransferAnomaly,
    RouteHealth,
}

impl RiskRule {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskRule::Concentration   => "concentration",
            RiskRule::LeverageStress  => "leverage_stress",
            RiskRule::StopCoverage    => "stop_coverage",
            RiskRule::FundingDrag     => "funding_drag",
            RiskRule::TransferAnomaly => "transfer_anomaly",
            RiskRule::RouteHealth     => "route_health",
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict implied by a single rule's severity.
pub fn verdict_for(severity: Severity) -> Verdict {
    match severity {
        Severity::Info     => Verdict::Allow,
        Severity::Warning  => Verdict::Warn,
        Severity::Critical => Verdict::Block,
    }
}

/// Output of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSignal {
    pub rule_id: RiskRule,
    pub severity: Severity,
    pub verdict: Verdict,
    /// 0-100, monotonic in the rule's key metric.
    pub score: f64,
    pub confidence: f64,
    pub coverage: f64,
    /// One-line human summary; the first evidence item.
    pub summary: String,
    pub evidence: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl RiskSignal {
    pub(crate) fn new(
        rule_id: RiskRule,
        severity: Severity,
        score: f64,
        confidence: f64,
        coverage: f64,
        evidence: Vec<String>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        let summary = evidence
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{rule_id} is {severity}"));
        Self {
            rule_id,
            severity,
            verdict: verdict_for(severity),
            score: if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 },
            confidence: confidence.clamp(0.0, 1.0),
            coverage: coverage.clamp(0.0, 1.0),
            summary,
            evidence,
            metrics,
        }
    }
}

/// Aggregate over all six rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSnapshot {
    /// One signal per rule, in rule order.
    pub signals: Vec<RiskSignal>,
    pub severity: Severity,
    pub verdict: Verdict,
    /// Mean of per-rule coverage.
    pub coverage: f64,
    pub stale: bool,
    pub snapshot_ts: u64,
    /// Highest-scoring rules first.  Score, not severity, drives this order.
    pub top_signals: Vec<RiskRule>,
}

impl RiskSnapshot {
    pub fn signal(&self, rule: RiskRule) -> Option<&RiskSignal> {
        self.signals.iter().find(|signal| signal.rule_id == rule)
    }
}

/// Run every rule against `snapshot`.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::risk::{evaluate_risk, PortfolioSnapshot, RiskRule};
/// use insight_governance_core::types::Severity;
///
/// let context = serde_json::json!({ "holdings": [{ "symbol": "BTC", "valueUsd": 100 }] });
/// let snapshot = PortfolioSnapshot::from_context(&context, 0);
/// let risk = evaluate_risk(&snapshot, 0);
///
/// assert_eq!(risk.signals.len(), 6);
/// assert_eq!(risk.signal(RiskRule::Concentration).map(|s| s.severity), Some(Severity::Critical));
/// ```
pub fn evaluate_risk(snapshot: &PortfolioSnapshot, now_ms: u64) -> RiskSnapshot {
    let signals = vec![
        rules::concentration(snapshot),
        rules::leverage_stress(snapshot),
        rules::stop_coverage(snapshot),
        rules::funding_drag(snapshot),
        rules::transfer_anomaly(snapshot),
        rules::route_health(snapshot),
    ];

    let severity = signals
        .iter()
        .map(|signal| signal.severity)
        .max()
        .unwrap_or(Severity::Info);
    let coverage = signals.iter().map(|signal| signal.coverage).sum::<f64>() / signals.len() as f64;

    let mut ranked: Vec<&RiskSignal> = signals.iter().collect();
    // Stable sort keeps rule order among equal scores.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let top_signals = ranked
        .into_iter()
        .take(TOP_SIGNAL_COUNT)
        .map(|signal| signal.rule_id)
        .collect();

    RiskSnapshot {
        severity,
        verdict: if severity == Severity::Info { Verdict::Allow } else { Verdict::Warn },
        coverage,
        stale: now_ms.saturating_sub(snapshot.snapshot_ts) > STALE_AFTER_MS,
        snapshot_ts: snapshot.snapshot_ts,
        top_signals,
        signals,
    }
}

/// Parse `context`, evaluate it, and write the result back into it.
///
/// Adds `riskSignals`, `riskSeverity` and `riskSnapshot` to an object context.
/// Non-object contexts are left untouched.
pub fn fold_into_context(context: &mut Value, now_ms: u64) -> RiskSnapshot {
    let snapshot = PortfolioSnapshot::from_context(context, now_ms);
    let risk = evaluate_risk(&snapshot, now_ms);

    if let Value::Object(map) = context {
        map.insert(
            "riskSignals".to_owned(),
            serde_json::to_value(&risk.signals).unwrap_or(Value::Array(Vec::new())),
        );
        map.insert("riskSeverity".to_owned(), Value::from(risk.severity.as_str()));
        map.insert(
            "riskSnapshot".to_owned(),
            serde_json::json!({
                "severity": risk.severity,
                "verdict": risk.verdict,
                "coverage": risk.coverage,
                "stale": risk.stale,
                "topSignals": risk.top_signals,
            }),
        );
    }

    risk
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn empty_context_yields_six_low_coverage_info_signals() {
        let risk = evaluate_risk(&PortfolioSnapshot::from_context(&json!({}), NOW), NOW);
        assert_eq!(risk.signals.len(), 6);
        assert_eq!(risk.severity, Severity::Info);
        assert_eq!(risk.verdict, Verdict::Allow);
        assert!(risk.coverage < 0.5);
        assert!(!risk.stale);
    }

    #[test]
    fn aggregate_takes_max_severity_and_ranks_by_score() {
        let context = json!({
            "snapshotTs": NOW - 20 * 60_000,
            "holdings": [{ "symbol": "BTC", "valueUsd": 6_000 }, { "symbol": "ETH", "valueUsd": 4_000 }],
            "positions": [{ "symbol": "BTC", "size": 1, "leverage": 2, "markPrice": 100, "liquidationPrice": 50, "stopLoss": 80 }]
        });
        let risk = evaluate_risk(&PortfolioSnapshot::from_context(&context, NOW), NOW);
        assert_eq!(risk.severity, Severity::Critical);
        assert_eq!(risk.verdict, Verdict::Warn);
        assert!(risk.stale);
        assert_eq!(risk.top_signals[0], RiskRule::Concentration);
        assert_eq!(risk.top_signals.len(), TOP_SIGNAL_COUNT);
    }

    #[test]
    fn per_rule_verdict_tracks_severity() {
        assert_eq!(verdict_for(Severity::Info), Verdict::Allow);
        assert_eq!(verdict_for(Severity::Warning), Verdict::Warn);
        assert_eq!(verdict_for(Severity::Critical), Verdict::Block);
    }

    #[test]
    fn folding_exposes_signals_to_policy() {
        let mut context = json!({ "holdings": [{ "symbol": "BTC", "valueUsd": 100 }] });
        let risk = fold_into_context(&mut context, NOW);
        assert_eq!(context["riskSeverity"], json!("critical"));
        assert_eq!(context["riskSignals"].as_array().map(Vec::len), Some(6));
        assert_eq!(context["riskSignals"][0]["ruleId"], json!("concentration"));
        assert_eq!(context["riskSnapshot"]["topSignals"][0], json!("concentration"));
        assert_eq!(crate::policy::context_severity(&context), Some(risk.severity));
    }

    #[test]
    fn scalar_context_is_left_alone() {
        let mut context = json!(42);
        fold_into_context(&mut context, NOW);
        assert_eq!(context, json!(42));
    }
}
