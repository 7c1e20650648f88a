// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Offline scenario replay.
//!
//! Each scenario runs the same pure pipeline the orchestrator uses after a
//! provider call, with no network and no store:
//!
//! 1. resolve `snapshotAgeMs` into a snapshot timestamp,
//! 2. fold the risk engine's signals into the context,
//! 3. normalize the recorded provider text (or the fallback text),
//! 4. evaluate policy with rollout allowed.

use std::time::Instant;

use insight_governance_core::context::{as_finite, build_context_meta, fingerprint_context};
use insight_governance_core::normalizer::normalize;
use insight_governance_core::policy;
use insight_governance_core::registry::{lookup, FeatureId};
use insight_governance_core::risk::fold_into_context;
use insight_governance_core::types::{
    ContractStatus, InsightContract, PolicyReason, Severity, Verdict,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::EvalError;
use crate::scenario::{EvalScenario, ExpectedContract, ScenarioFile};

/// Context field holding a simulated observation age.
pub const SNAPSHOT_AGE_KEY: &str = "snapshotAgeMs";

/// Outcome of one replayed scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub id: String,
    pub feature: FeatureId,
    pub status: ContractStatus,
    pub expected_status: Option<ContractStatus>,
    pub severity: Severity,
    pub verdict: Verdict,
    pub expected_verdict: Verdict,
    pub reasons: Vec<PolicyReason>,
    /// Contract meets its invariants and the scenario's expected shape.
    pub contract_valid: bool,
    /// Contract carries at least the feature's minimum evidence.
    pub evidence_complete: bool,
    /// Context age exceeds the feature's maximum.
    pub stale_context: bool,
    pub latency_ms: f64,
}

/// Copy `context`, replacing `snapshotAgeMs` with `snapshotTs = now - age`.
pub fn prepare_context(context: &Value, now_ms: u64) -> Value {
    let mut prepared = context.clone();
    if let Value::Object(map) = &mut prepared {
        if let Some(age) = map.remove(SNAPSHOT_AGE_KEY).as_ref().and_then(as_finite) {
            let snapshot_ts = now_ms.saturating_sub(age.max(0.0) as u64);
            map.insert("snapshotTs".to_owned(), Value::from(snapshot_ts));
        }
    }
    prepared
}

fn contract_matches(contract: &InsightContract, expected: &ExpectedContract, now_ms: u64) -> bool {
    let risk_ok = expected.risk_contains.as_deref().map_or(true, |needle| {
        contract.risk.to_lowercase().contains(&needle.to_lowercase())
    });
    contract.satisfies_invariants(now_ms)
        && contract.evidence.len() >= expected.min_evidence
        && contract.confidence >= expected.min_confidence
        && risk_ok
}

/// Replay one scenario at `now_ms`.
///
/// # Errors
///
/// [`EvalError::Core`] when the scenario names an unknown feature.
pub fn run_scenario(scenario: &EvalScenario, now_ms: u64) -> Result<ScenarioResult, EvalError> {
    let feature: FeatureId = scenario.feature.parse()?;
    let config = lookup(feature);
    let started = Instant::now();

    let mut context = prepare_context(&scenario.context, now_ms);
    fold_into_context(&mut context, now_ms);
    let meta = build_context_meta(&context, &fingerprint_context(&context), now_ms);

    let raw = scenario
        .raw_output
        .clone()
        .unwrap_or_else(|| config.build_fallback_text(&context));
    let (contract, status) = normalize(&raw, config, &context, now_ms);
    let outcome = policy::evaluate(config, &contract, &context, &meta, true, now_ms);

    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
    let result = ScenarioResult {
        id: scenario.id.clone(),
        feature,
        status,
        expected_status: scenario.expected_status,
        severity: outcome.severity,
        verdict: outcome.verdict,
        expected_verdict: scenario.expected_verdict,
        reasons: outcome.policy.reasons,
        contract_valid: contract_matches(&contract, &scenario.expected_contract, now_ms),
        evidence_complete: contract.evidence.len() >= config.thresholds.min_evidence_items,
        stale_context: now_ms.saturating_sub(meta.snapshot_ts) > config.thresholds.max_context_age_ms,
        latency_ms,
    };
    debug!(
        scenario = %result.id,
        feature = %feature,
        status = %result.status,
        verdict = %result.verdict,
        expected = %result.expected_verdict,
        "scenario replayed"
    );
    Ok(result)
}

/// Replay every scenario in `file`.  The file's `nowMs` wins over
/// `default_now_ms`.
pub fn run_file(file: &ScenarioFile, default_now_ms: u64) -> Result<Vec<ScenarioResult>, EvalError> {
    let now_ms = file.now_ms.unwrap_or(default_now_ms);
    file.scenarios
        .iter()
        .map(|scenario| run_scenario(scenario, now_ms))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use insight_governance_core::InsightError;
    use serde_json::json;

    const NOW: u64 = 1_760_000_000_000;

    fn scenario(feature: &str, context: Value, raw: Option<&str>, verdict: Verdict) -> EvalScenario {
        EvalScenario {
            id: "t".into(),
            feature: feature.into(),
            context,
            raw_output: raw.map(str::to_owned),
            expected_contract: ExpectedContract::default(),
            expected_status: None,
            expected_verdict: verdict,
        }
    }

    #[test]
    fn snapshot_age_becomes_a_timestamp() {
        let prepared = prepare_context(&json!({ "snapshotAgeMs": 900_000, "x": 1 }), NOW);
        assert_eq!(prepared["snapshotTs"], json!(NOW - 900_000));
        assert!(prepared.get(SNAPSHOT_AGE_KEY).is_none());
        assert_eq!(prepared["x"], json!(1));
    }

    #[test]
    fn stale_context_blocks() {
        let raw = r#"{"risk":"Allocation is even.","action":"Hold.","confidence":0.9,"evidence":["a","b"]}"#;
        let result = run_scenario(
            &scenario(
                "portfolio_overview",
                json!({ "snapshotAgeMs": 900_000, "dataCoverage": 0.9 }),
                Some(raw),
                Verdict::Block,
            ),
            NOW,
        )
        .unwrap();
        assert!(result.stale_context);
        assert_eq!(result.verdict, Verdict::Block);
        assert!(result.reasons.contains(&PolicyReason::StaleContext));
        assert!(result.contract_valid);
    }

    #[test]
    fn small_transfer_sample_stays_info() {
        let context = json!({
            "snapshotAgeMs": 60_000,
            "dataCoverage": 0.9,
            "transfers": [
                { "ts": NOW - 7_200_000, "amountUsd": 50_000 },
                { "ts": NOW - 172_800_000, "amountUsd": 100 }
            ]
        });
        let raw = r#"{"risk":"Two transfers look routine.","action":"No change needed.","confidence":0.8,"evidence":["a","b"]}"#;
        let result = run_scenario(&scenario("transfer_review", context, Some(raw), Verdict::Allow), NOW).unwrap();
        assert_eq!(result.severity, Severity::Info);
        assert_eq!(result.verdict, Verdict::Allow);
    }

    #[test]
    fn missing_data_coverage_counts_as_complete() {
        let holdings: Vec<_> = ["BTC", "ETH", "SOL", "ARB", "OP"]
            .iter()
            .map(|symbol| json!({ "symbol": symbol, "valueUsd": 2_000 }))
            .collect();
        let raw = r#"{"risk":"Allocation is spread evenly.","action":"Hold the current allocation.","confidence":0.9,"evidence":["a","b"]}"#;
        let result = run_scenario(
            &scenario(
                "portfolio_overview",
                json!({ "snapshotAgeMs": 60_000, "holdings": holdings }),
                Some(raw),
                Verdict::Allow,
            ),
            NOW,
        )
        .unwrap();
        assert!(!result.reasons.contains(&PolicyReason::IncompleteCoverage));
        assert_eq!(result.verdict, Verdict::Allow);
    }

    #[test]
    fn missing_raw_output_replays_fallback_text() {
        let result = run_scenario(
            &scenario("funding_watch", json!({ "dataCoverage": 0.9 }), None, Verdict::Warn),
            NOW,
        )
        .unwrap();
        assert_eq!(result.status, ContractStatus::Repaired);
        assert!(result.evidence_complete);
    }

    #[test]
    fn unknown_feature_is_reported() {
        let err = run_scenario(&scenario("nope", json!({}), None, Verdict::Allow), NOW).unwrap_err();
        assert!(matches!(err, EvalError::Core(InsightError::UnknownFeature(ref id)) if id == "nope"));
    }

    #[test]
    fn expected_shape_is_checked() {
        let raw = r#"{"risk":"Allocation is even.","action":"Hold.","confidence":0.6,"evidence":["a"]}"#;
        let mut replay = scenario("portfolio_overview", json!({}), Some(raw), Verdict::Allow);
        replay.expected_contract = ExpectedContract {
            min_evidence: 2,
            min_confidence: 0.5,
            risk_contains: Some("EVEN".into()),
        };
        assert!(!run_scenario(&replay, NOW).unwrap().contract_valid);

        replay.expected_contract.min_evidence = 1;
        assert!(run_scenario(&replay, NOW).unwrap().contract_valid);
    }
}
