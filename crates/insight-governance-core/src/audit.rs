// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Audit log management.
//!
//! [`AuditLogger`] exposes two operations only:
//!
//! * [`log`](AuditLogger::log)     - record the terminal state of a request
//! * [`query`](AuditLogger::query) - search / filter the bounded log
//!
//! The log is **recording only**.  It keeps the most recent
//! [`AUDIT_LOG_CAPACITY`](crate::storage::AUDIT_LOG_CAPACITY) entries and
//! drives no decisions.

use crate::storage::InsightStore;
use crate::types::{AuditEntry, AuditFilter};

/// Records request outcomes in a bounded append-only log.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::audit::AuditLogger;
/// use insight_governance_core::registry::FeatureId;
/// use insight_governance_core::storage::InMemoryStorage;
/// use insight_governance_core::types::{
///     AuditEntry, AuditFilter, ContractStatus, RequestOutcome, Severity, Verdict,
/// };
///
/// let mut logger = AuditLogger::new(InMemoryStorage::new());
/// logger.log(AuditEntry {
///     feature: FeatureId::FundingWatch,
///     outcome: RequestOutcome::BudgetExceeded,
///     requested_at: 10,
///     completed_at: 12,
///     provider: None,
///     model: None,
///     contract_status: ContractStatus::Fallback,
///     confidence: 0.5,
///     severity: Severity::Info,
///     verdict: Verdict::Allow,
///     policy_reasons: Vec::new(),
///     context_version: 1,
///     context_hash: "abc".into(),
///     snapshot_ts: 10,
///     source_ids: Vec::new(),
/// });
///
/// let filter = AuditFilter { outcome: Some(RequestOutcome::BudgetExceeded), ..AuditFilter::default() };
/// assert_eq!(logger.query(&filter).len(), 1);
/// ```
pub struct AuditLogger<S: InsightStore> {
    storage: S,
}

impl<S: InsightStore> AuditLogger<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Append one entry.  Every non-cached terminal state is logged.
    pub fn log(&mut self, entry: AuditEntry) {
        tracing::debug!(
            feature = %entry.feature,
            outcome = %entry.outcome,
            verdict = %entry.verdict,
            context_hash = %entry.context_hash,
            "audit entry appended"
        );
        self.storage.append_audit(entry);
    }

    /// Entries that satisfy `filter`, oldest first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insight_governance_core::registry::FeatureId;
    /// use insight_governance_core::types::AuditFilter;
    ///
    /// let filter = AuditFilter {
    ///     feature: Some(FeatureId::PositionRisk),
    ///     limit: Some(10),
    ///     ..AuditFilter::default()
    /// };
    /// ```
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.storage.query_audit(filter)
    }

    /// Borrow the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
