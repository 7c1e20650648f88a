// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Aggregate scoring and release gates.

use std::fmt;

use insight_governance_core::types::{ContractStatus, PolicyReason, Verdict};
use serde::{Deserialize, Serialize};

use crate::harness::ScenarioResult;

/// Minimum scores a run must reach to pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalGates {
    pub min_contract_valid_rate: f64,
    pub min_stale_correctness: f64,
    pub min_block_recall: f64,
    pub min_evidence_completeness: f64,
}

impl Default for EvalGates {
    fn default() -> Self {
        Self {
            min_contract_valid_rate: 0.95,
            min_stale_correctness: 1.0,
            min_block_recall: 0.9,
            min_evidence_completeness: 0.9,
        }
    }
}

/// Scores over one or more fixture files.
///
/// Every rate is a fraction in `[0, 1]`.  A rate with an empty denominator
/// is reported as `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub scenario_count: usize,
    pub contract_valid_rate: f64,
    pub block_precision: f64,
    pub block_recall: f64,
    /// Share of stale-context scenarios that were blocked for staleness.
    pub stale_correctness: f64,
    pub evidence_completeness: f64,
    /// Share of scenarios with an expected status whose status matched.
    pub status_match_rate: f64,
    pub fallback_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Ids of scenarios whose verdict differed from the expectation.
    pub verdict_mismatches: Vec<String>,
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        hits as f64 / total as f64
    }
}

fn count(results: &[ScenarioResult], predicate: impl Fn(&ScenarioResult) -> bool) -> usize {
    results.iter().filter(|result| predicate(result)).count()
}

fn p95(latencies: &mut [f64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.sort_by(f64::total_cmp);
    let rank = (latencies.len() as f64 * 0.95).ceil() as usize;
    latencies[rank.clamp(1, latencies.len()) - 1]
}

impl EvalReport {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let total = results.len();
        let predicted_block = count(results, |r| r.verdict == Verdict::Block);
        let expected_block = count(results, |r| r.expected_verdict == Verdict::Block);
        let true_block = count(results, |r| r.verdict == Verdict::Block && r.expected_verdict == Verdict::Block);

        let stale = count(results, |r| r.stale_context);
        let stale_blocked = count(results, |r| {
            r.stale_context && r.verdict == Verdict::Block && r.reasons.contains(&PolicyReason::StaleContext)
        });

        let with_status = count(results, |r| r.expected_status.is_some());
        let status_matched = count(results, |r| r.expected_status == Some(r.status));

        let mut latencies: Vec<f64> = results.iter().map(|result| result.latency_ms).collect();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            latencies.iter().sum::<f64>() / total as f64
        };

        Self {
            scenario_count: total,
            contract_valid_rate: rate(count(results, |r| r.contract_valid), total),
            block_precision: rate(true_block, predicted_block),
            block_recall: rate(true_block, expected_block),
            stale_correctness: rate(stale_blocked, stale),
            evidence_completeness: rate(count(results, |r| r.evidence_complete), total),
            status_match_rate: rate(status_matched, with_status),
            fallback_rate: rate(count(results, |r| r.status == ContractStatus::Fallback), total),
            avg_latency_ms,
            p95_latency_ms: p95(&mut latencies),
            verdict_mismatches: results
                .iter()
                .filter(|result| result.verdict != result.expected_verdict)
                .map(|result| result.id.clone())
                .collect(),
        }
    }

    /// Human-readable description of every gate this report misses.
    pub fn gate_failures(&self, gates: &EvalGates) -> Vec<String> {
        let checks = [
            ("contractValidRate", self.contract_valid_rate, gates.min_contract_valid_rate),
            ("staleCorrectness", self.stale_correctness, gates.min_stale_correctness),
            ("blockRecall", self.block_recall, gates.min_block_recall),
            ("evidenceCompleteness", self.evidence_completeness, gates.min_evidence_completeness),
        ];
        checks
            .into_iter()
            .filter(|(_, value, minimum)| value < minimum)
            .map(|(name, value, minimum)| format!("{name} {value:.3} < {minimum:.3}"))
            .collect()
    }

    pub fn passes(&self, gates: &EvalGates) -> bool {
        self.gate_failures(gates).is_empty()
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenarios             {}", self.scenario_count)?;
        writeln!(f, "contract valid rate   {:.3}", self.contract_valid_rate)?;
        writeln!(f, "block precision       {:.3}", self.block_precision)?;
        writeln!(f, "block recall          {:.3}", self.block_recall)?;
        writeln!(f, "stale correctness     {:.3}", self.stale_correctness)?;
        writeln!(f, "evidence completeness {:.3}", self.evidence_completeness)?;
        writeln!(f, "status match rate     {:.3}", self.status_match_rate)?;
        writeln!(f, "fallback rate         {:.3}", self.fallback_rate)?;
        writeln!(f, "latency avg / p95     {:.3} / {:.3} ms", self.avg_latency_ms, self.p95_latency_ms)?;
        if !self.verdict_mismatches.is_empty() {
            writeln!(f, "verdict mismatches    {}", self.verdict_mismatches.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
