// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # insight-governance-core
//!
//! Governance layer that sits between a portfolio dashboard and an untrusted
//! text-generation provider.  Every provider output is forced into a
//! structured [`InsightContract`], checked against per-feature policy, and
//! gated by runtime flags, deterministic rollout, a TTL cache, daily budgets
//! and an append-only audit log.  A deterministic risk engine derives
//! portfolio signals from the same context.
//!
//! ## Architecture
//!
//! ```text
//! InsightOrchestrator<S: InsightStore>
//!   ├── registry          - static per-feature configuration
//!   ├── context           - fingerprint and observation metadata
//!   ├── rollout           - FNV-1a bucketing per (feature, context)
//!   ├── InsightCache<S>   - TTL cache of frozen contracts
//!   ├── BudgetManager<S>  - per-feature, per-UTC-day generation counters
//!   ├── AuditLogger<S>    - bounded, append-only request log
//!   ├── InsightProvider   - untrusted generator (blocking + streaming)
//!   ├── normalizer        - validated → repaired → fallback contract ladder
//!   └── policy            - severity, reasons and verdict
//!
//! risk::evaluate_risk     - six deterministic portfolio rules
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use insight_governance_core::{
//!     normalizer::normalize,
//!     policy::evaluate,
//!     context::build_context_meta,
//!     registry::{lookup, FeatureId},
//!     types::{ContractStatus, Verdict},
//! };
//!
//! let config  = lookup(FeatureId::PortfolioOverview);
//! let context = serde_json::json!({ "snapshotTs": 1_000, "dataCoverage": 0.9 });
//! let raw     = r#"{"risk":"Allocation is balanced.","action":"Hold.","confidence":0.8}"#;
//!
//! let (contract, status) = normalize(raw, config, &context, 1_000);
//! assert_eq!(status, ContractStatus::Validated);
//!
//! let meta    = build_context_meta(&context, "hash", 1_000);
//! let outcome = evaluate(config, &contract, &context, &meta, true, 1_000);
//! assert_eq!(outcome.verdict, Verdict::Allow);
//! ```

pub mod audit;
pub mod budget;
pub mod cache;
pub mod clock;
pub mod config;
pub mod config_loader;
pub mod context;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod risk;
pub mod rollout;
pub mod storage;
pub mod stream;
pub mod telemetry;
pub mod types;

pub use error::{InsightError, InsightResult, ProviderError};
pub use orchestrator::InsightOrchestrator;
pub use registry::{FeatureConfig, FeatureId};
pub use storage::{InMemoryStorage, InsightStore, SharedStorage};
pub use types::{
    AuditEntry, AuditFilter, ContractStatus, InsightContract, InsightRequest, InsightResponse,
    PolicyReason, RequestOutcome, Severity, Verdict,
};
