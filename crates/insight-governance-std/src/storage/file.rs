// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON storage backend.
//!
//! [`FileStorage`] persists every store namespace to a single JSON file on
//! disk.  Every mutation flushes the file atomically (write-rename) so that a
//! crash mid-write does not corrupt existing data.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "cache":          { "<feature>:<contextHash>": CacheEntry, ... },
//!   "budget":         { "<feature>": BudgetCounter, ... },
//!   "audit":          [ AuditEntry, ... ],
//!   "runtimeEnabled": true,
//!   "featureEnabled": { "<feature>": false, ... },
//!   "rolloutPercent": { "<feature>": 25, ... }
//! }
//! ```
//!
//! ## Cross-process use
//!
//! Writes from another process become visible after [`FileStorage::reload`].
//! Last writer wins; there is no file locking.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use insight_governance_core::registry::FeatureId;
use insight_governance_core::storage::{filter_audit, trim_audit, InsightStore};
use insight_governance_core::types::{AuditEntry, AuditFilter, BudgetCounter, CacheEntry};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Snapshot of all store state, serialised to / deserialised from disk.
///
/// Per-feature maps are keyed by the feature's snake_case id.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoreSnapshot {
    cache:           BTreeMap<String, CacheEntry>,
    budget:          BTreeMap<String, BudgetCounter>,
    audit:           Vec<AuditEntry>,
    runtime_enabled: Option<bool>,
    feature_enabled: BTreeMap<String, bool>,
    rollout_percent: BTreeMap<String, u8>,
}

fn read_snapshot(path: &Path) -> io::Result<StoreSnapshot> {
    if !path.exists() {
        return Ok(StoreSnapshot::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|error| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("insight storage JSON parse error: {error}"),
        )
    })
}

/// A file-backed [`InsightStore`] that persists state as JSON.
///
/// # Examples
///
/// ```rust,no_run
/// use insight_governance_core::registry::FeatureId;
/// use insight_governance_core::InsightStore;
/// use insight_governance_std::storage::file::FileStorage;
///
/// let mut storage = FileStorage::open("/tmp/insight.json")
///     .expect("could not open storage");
///
/// storage.set_rollout_percent(FeatureId::FundingWatch, 25);
/// assert_eq!(storage.rollout_percent(FeatureId::FundingWatch), Some(25));
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: StoreSnapshot,
}

impl FileStorage {
    /// Open an existing JSON storage file, or start empty if the path does
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file exists but cannot be read or if
    /// the JSON is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = read_snapshot(&path)?;
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory state with what is on disk.
    ///
    /// On error the in-memory state is left untouched.
    ///
    /// # Errors
    ///
    /// Same as [`FileStorage::open`].
    pub fn reload(&mut self) -> io::Result<()> {
        self.data = read_snapshot(&self.path)?;
        Ok(())
    }

    /// Flush the current in-memory state to disk using an atomic write-rename.
    ///
    /// The file is written to `<path>.tmp` first, then renamed over the
    /// target.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if serialisation fails or the file cannot be
    /// written or renamed.
    pub fn flush(&self) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.data).map_err(|error| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("insight storage serialisation error: {error}"),
            )
        })?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Flush after a mutation.  Store writes are best-effort, so a failure is
    /// logged and the in-memory state stays authoritative.
    fn persist(&self) {
        if let Err(error) = self.flush() {
            warn!(path = %self.path.display(), %error, "insight storage flush failed");
        }
    }
}

impl InsightStore for FileStorage {
    fn get_cache(&self, key: &str) -> Option<CacheEntry> {
        self.data.cache.get(key).cloned()
    }

    fn set_cache(&mut self, key: &str, entry: CacheEntry) {
        self.data.cache.insert(key.to_owned(), entry);
        self.persist();
    }

    fn retain_cache(&mut self, keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize {
        let before = self.data.cache.len();
        self.data.cache.retain(|key, entry| keep(key, entry));
        let removed = before - self.data.cache.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn get_budget(&self, feature: FeatureId) -> Option<BudgetCounter> {
        self.data.budget.get(feature.as_str()).cloned()
    }

    fn set_budget(&mut self, feature: FeatureId, counter: BudgetCounter) {
        self.data.budget.insert(feature.as_str().to_owned(), counter);
        self.persist();
    }

    fn append_audit(&mut self, entry: AuditEntry) {
        self.data.audit.push(entry);
        trim_audit(&mut self.data.audit);
        self.persist();
    }

    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        filter_audit(&self.data.audit, filter)
    }

    fn runtime_enabled(&self) -> Option<bool> {
        self.data.runtime_enabled
    }

    fn set_runtime_enabled(&mut self, enabled: bool) {
        self.data.runtime_enabled = Some(enabled);
        self.persist();
    }

    fn feature_enabled(&self, feature: FeatureId) -> Option<bool> {
        self.data.feature_enabled.get(feature.as_str()).copied()
    }

    fn set_feature_enabled(&mut self, feature: FeatureId, enabled: bool) {
        self.data.feature_enabled.insert(feature.as_str().to_owned(), enabled);
        self.persist();
    }

    fn rollout_percent(&self, feature: FeatureId) -> Option<u8> {
        self.data.rollout_percent.get(feature.as_str()).copied()
    }

    fn set_rollout_percent(&mut self, feature: FeatureId, percent: u8) {
        self.data.rollout_percent.insert(feature.as_str().to_owned(), percent.min(100));
        self.persist();
    }

    /// Re-read the file.  On failure the in-memory state stays as it was.
    fn refresh(&mut self) {
        if let Err(error) = self.reload() {
            warn!(path = %self.path.display(), %error, "insight storage reload failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use insight_governance_core::storage::{SharedStorage, AUDIT_LOG_CAPACITY};
    use insight_governance_core::types::{
        CachedInsight, ContractStatus, InsightContract, PolicyReason, RequestOutcome, Severity,
        Verdict,
    };

    fn audit_entry(at: u64) -> AuditEntry {
        AuditEntry {
            feature: FeatureId::TransferReview,
            outcome: RequestOutcome::Generated,
            requested_at: at,
            completed_at: at,
            provider: Some("test".into()),
            model: None,
            contract_status: ContractStatus::Validated,
            confidence: 0.7,
            severity: Severity::Warning,
            verdict: Verdict::Block,
            policy_reasons: vec![PolicyReason::StaleContext],
            context_version: 1,
            context_hash: format!("hash-{at}"),
            snapshot_ts: at,
            source_ids: vec!["wallet".into()],
        }
    }

    fn cache_entry() -> CacheEntry {
        CacheEntry {
            created_at: 42,
            insight: CachedInsight {
                contract: InsightContract {
                    schema_version: 1,
                    risk: "Allocation is balanced.".into(),
                    action: "Hold.".into(),
                    confidence: 0.8,
                    evidence: vec!["BTC 40%".into()],
                    expires_at: 1_000,
                },
                status: ContractStatus::Validated,
                provider: Some("test".into()),
                model: None,
            },
        }
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = FileStorage::open(&path).unwrap();
        store.set_cache("portfolio_overview:abc", cache_entry());
        store.set_budget(FeatureId::FundingWatch, BudgetCounter { date: "2026-01-02".into(), count: 3 });
        store.set_runtime_enabled(false);
        store.set_feature_enabled(FeatureId::PositionRisk, false);
        store.set_rollout_percent(FeatureId::FundingWatch, 30);
        store.append_audit(audit_entry(7));

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get_cache("portfolio_overview:abc"), Some(cache_entry()));
        assert_eq!(reopened.get_budget(FeatureId::FundingWatch).map(|counter| counter.count), Some(3));
        assert_eq!(reopened.runtime_enabled(), Some(false));
        assert_eq!(reopened.feature_enabled(FeatureId::PositionRisk), Some(false));
        assert_eq!(reopened.rollout_percent(FeatureId::FundingWatch), Some(30));
        assert_eq!(reopened.query_audit(&AuditFilter::default()), vec![audit_entry(7)]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn reload_picks_up_another_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let shared = SharedStorage::new(FileStorage::open(&path).unwrap());
        assert_eq!(shared.runtime_enabled(), None);

        let mut other = FileStorage::open(&path).unwrap();
        other.set_runtime_enabled(false);

        assert_eq!(shared.runtime_enabled(), None);
        shared.with(|store| store.reload()).unwrap();
        assert_eq!(shared.runtime_enabled(), Some(false));
    }

    #[test]
    fn malformed_file_is_rejected_and_reload_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = FileStorage::open(&path).unwrap();
        store.set_rollout_percent(FeatureId::TransferReview, 10);

        std::fs::write(&path, "{ not json").unwrap();
        let err = FileStorage::open(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        assert!(store.reload().is_err());
        assert_eq!(store.rollout_percent(FeatureId::TransferReview), Some(10));
    }

    #[test]
    fn audit_log_is_bounded_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = FileStorage::open(&path).unwrap();
        for at in 0..(AUDIT_LOG_CAPACITY as u64 + 5) {
            store.append_audit(audit_entry(at));
        }

        let reopened = FileStorage::open(&path).unwrap();
        let entries = reopened.query_audit(&AuditFilter::default());
        assert_eq!(entries.len(), AUDIT_LOG_CAPACITY);
        assert_eq!(entries[0].completed_at, 5);

        let newest = reopened.query_audit(&AuditFilter { limit: Some(1), ..AuditFilter::default() });
        assert_eq!(newest[0].completed_at, AUDIT_LOG_CAPACITY as u64 + 4);
    }

    #[test]
    fn refresh_reads_other_writers_and_survives_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = FileStorage::open(&path).unwrap();
        let mut other = FileStorage::open(&path).unwrap();
        other.set_rollout_percent(FeatureId::FundingWatch, 40);

        store.refresh();
        assert_eq!(store.rollout_percent(FeatureId::FundingWatch), Some(40));

        std::fs::write(&path, "{ not json").unwrap();
        store.refresh();
        assert_eq!(store.rollout_percent(FeatureId::FundingWatch), Some(40));
    }

    #[test]
    fn retain_cache_removes_entries_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = FileStorage::open(&path).unwrap();
        store.set_cache("portfolio_overview:old", cache_entry());
        store.set_cache("portfolio_overview:new", CacheEntry { created_at: 900, ..cache_entry() });

        let removed = store.retain_cache(&mut |_, entry| entry.created_at >= 900);
        assert_eq!(removed, 1);

        let reopened = FileStorage::open(&path).unwrap();
        assert!(reopened.get_cache("portfolio_overview:old").is_none());
        assert!(reopened.get_cache("portfolio_overview:new").is_some());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{ "runtimeEnabled": true }"#).unwrap();

        let store = FileStorage::open(&path).unwrap();
        assert_eq!(store.runtime_enabled(), Some(true));
        assert!(store.query_audit(&AuditFilter::default()).is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
