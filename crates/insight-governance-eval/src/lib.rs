// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # insight-governance-eval
//!
//! Offline replay harness for the insight guardrails.  Fixture scenarios are
//! run through the risk engine, the contract normalizer and the policy
//! engine without any provider or store, then scored against release gates.
//!
//! ```rust
//! use insight_governance_eval::{harness::run_file, parse_scenarios, EvalGates, EvalReport};
//!
//! let fixtures = r#"{
//!   "nowMs": 1760000000000,
//!   "scenarios": [{
//!     "id": "stale",
//!     "feature": "portfolio_overview",
//!     "context": { "snapshotAgeMs": 900000, "dataCoverage": 0.9 },
//!     "rawOutput": "{\"risk\":\"Allocation is even.\",\"action\":\"Hold.\",\"confidence\":0.9,\"evidence\":[\"a\",\"b\"]}",
//!     "expectedVerdict": "block"
//!   }]
//! }"#;
//!
//! let file = parse_scenarios(fixtures, "inline").unwrap();
//! let report = EvalReport::from_results(&run_file(&file, 0).unwrap());
//! assert_eq!(report.stale_correctness, 1.0);
//! assert!(report.passes(&EvalGates::default()));
//! ```

pub mod error;
pub mod harness;
pub mod report;
pub mod scenario;

pub use error::EvalError;
pub use harness::{run_file, run_scenario, ScenarioResult};
pub use report::{EvalGates, EvalReport};
pub use scenario::{load_scenarios, parse_scenarios, EvalScenario, ExpectedContract, ScenarioFile};
