// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Fixture file model.
//!
//! ```json
//! {
//!   "nowMs": 1760000000000,
//!   "scenarios": [
//!     {
//!       "id": "overview-stale",
//!       "feature": "portfolio_overview",
//!       "context": { "snapshotAgeMs": 900000, "dataCoverage": 0.9 },
//!       "rawOutput": "{\"risk\":\"...\",\"action\":\"...\",\"confidence\":0.8}",
//!       "expectedContract": { "minEvidence": 2, "minConfidence": 0.5 },
//!       "expectedStatus": "validated",
//!       "expectedVerdict": "block"
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use insight_governance_core::types::{ContractStatus, Verdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EvalError;

/// Shape the normalized contract must have for a scenario to count as valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedContract {
    #[serde(default)]
    pub min_evidence: usize,
    #[serde(default)]
    pub min_confidence: f64,
    /// Case-insensitive substring the risk text must contain.
    #[serde(default)]
    pub risk_contains: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalScenario {
    pub id: String,
    /// Feature id, parsed when the scenario runs.
    pub feature: String,
    /// May carry `snapshotAgeMs`, which is turned into a snapshot timestamp
    /// relative to the evaluation time.
    pub context: Value,
    /// Provider text to replay.  Without it the feature's fallback text is
    /// normalized instead.
    #[serde(default)]
    pub raw_output: Option<String>,
    #[serde(default)]
    pub expected_contract: ExpectedContract,
    #[serde(default)]
    pub expected_status: Option<ContractStatus>,
    pub expected_verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioFile {
    /// Evaluation time.  Defaults to the wall-clock.
    #[serde(default)]
    pub now_ms: Option<u64>,
    pub scenarios: Vec<EvalScenario>,
}

/// Read and parse one fixture file.
pub fn load_scenarios(path: &Path) -> Result<ScenarioFile, EvalError> {
    let label = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
        path: label.clone(),
        source,
    })?;
    parse_scenarios(&raw, &label)
}

/// Parse fixture JSON.  `label` names the source in errors.
pub fn parse_scenarios(raw: &str, label: &str) -> Result<ScenarioFile, EvalError> {
    serde_json::from_str(raw).map_err(|source| EvalError::Json {
        path: label.to_owned(),
        source,
    })
}
