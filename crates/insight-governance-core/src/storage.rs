// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Storage abstraction for the insight governance layer.
//!
//! The [`InsightStore`] trait is the single interface between the orchestrator
//! and any persistence layer.  It covers three logical namespaces (cache,
//! budget, audit) plus the runtime, per-feature and rollout flags.  This crate
//! ships [`InMemoryStorage`]; the file-backed store lives in
//! `insight-governance-std`.
//!
//! Store operations are infallible.  Backends that hit an I/O error degrade to
//! empty defaults (cache miss, zero budget used, empty audit) instead of
//! surfacing it, since everything stored here is best-effort.
//!
//! # Sharing
//!
//! The orchestrator hands one clone of the store to each manager.  For stores
//! that hold their state by value (like [`InMemoryStorage`]) wrap them in
//! [`SharedStorage`] first so every clone sees the same data.
//!
//! # Implementing `InsightStore`
//!
//! ```rust,no_run
//! use insight_governance_core::registry::FeatureId;
//! use insight_governance_core::storage::InsightStore;
//! use insight_governance_core::types::{AuditEntry, AuditFilter, BudgetCounter, CacheEntry};
//!
//! struct MyStore;
//!
//! impl InsightStore for MyStore {
//!     fn get_cache(&self, _key: &str) -> Option<CacheEntry> { None }
//!     fn set_cache(&mut self, _key: &str, _entry: CacheEntry) {}
//!     fn retain_cache(&mut self, _keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize { 0 }
//!     fn get_budget(&self, _feature: FeatureId) -> Option<BudgetCounter> { None }
//!     fn set_budget(&mut self, _feature: FeatureId, _counter: BudgetCounter) {}
//!     fn append_audit(&mut self, _entry: AuditEntry) {}
//!     fn query_audit(&self, _filter: &AuditFilter) -> Vec<AuditEntry> { Vec::new() }
//!     fn runtime_enabled(&self) -> Option<bool> { None }
//!     fn set_runtime_enabled(&mut self, _enabled: bool) {}
//!     fn feature_enabled(&self, _feature: FeatureId) -> Option<bool> { None }
//!     fn set_feature_enabled(&mut self, _feature: FeatureId, _enabled: bool) {}
//!     fn rollout_percent(&self, _feature: FeatureId) -> Option<u8> { None }
//!     fn set_rollout_percent(&mut self, _feature: FeatureId, _percent: u8) {}
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

use crate::registry::FeatureId;
use crate::types::{AuditEntry, AuditFilter, BudgetCounter, CacheEntry};

/// Audit entries kept per store; older entries are dropped first.
pub const AUDIT_LOG_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// InsightStore trait
// ---------------------------------------------------------------------------

/// Pluggable persistence interface for the orchestrator.
///
/// Implementations MUST be `Send + Sync` so the orchestrator can be shared
/// across tasks.
pub trait InsightStore: Send + Sync {
    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// Retrieve the cache entry stored under `"feature:contextHash"`.
    fn get_cache(&self, key: &str) -> Option<CacheEntry>;

    /// Persist or overwrite the cache entry under `key`.
    fn set_cache(&mut self, key: &str, entry: CacheEntry);

    /// Drop every cache entry for which `keep` returns `false`.  Returns the
    /// number of entries removed.
    fn retain_cache(&mut self, keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize;

    // ------------------------------------------------------------------
    // Budget
    // ------------------------------------------------------------------

    /// Retrieve the daily counter for `feature`, if any.
    fn get_budget(&self, feature: FeatureId) -> Option<BudgetCounter>;

    /// Persist or overwrite the daily counter for `feature`.
    fn set_budget(&mut self, feature: FeatureId, counter: BudgetCounter);

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Append an entry, trimming the log to [`AUDIT_LOG_CAPACITY`].
    fn append_audit(&mut self, entry: AuditEntry);

    /// Return the entries that satisfy `filter`, oldest first.
    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry>;

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Persisted global runtime flag.  `None` means never set.
    fn runtime_enabled(&self) -> Option<bool>;

    fn set_runtime_enabled(&mut self, enabled: bool);

    /// Persisted per-feature enable override.  `None` means use the registry
    /// default.
    fn feature_enabled(&self, feature: FeatureId) -> Option<bool>;

    fn set_feature_enabled(&mut self, feature: FeatureId, enabled: bool);

    /// Persisted per-feature rollout override.  `None` means use the registry
    /// default.
    fn rollout_percent(&self, feature: FeatureId) -> Option<u8>;

    fn set_rollout_percent(&mut self, feature: FeatureId, percent: u8);

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Pick up changes made outside this process.  Stores that hold no
    /// external state keep the default no-op.
    fn refresh(&mut self) {}
}

/// Apply `filter` to an audit log held oldest-first.
///
/// When a limit is set the newest matching entries are kept, still returned
/// oldest-first.  Shared by every backend so they answer queries identically.
pub fn filter_audit(entries: &[AuditEntry], filter: &AuditFilter) -> Vec<AuditEntry> {
    let matching: Vec<&AuditEntry> = entries.iter().filter(|entry| filter.matches(entry)).collect();
    let skip = filter
        .limit
        .map_or(0, |limit| matching.len().saturating_sub(limit));
    matching.into_iter().skip(skip).cloned().collect()
}

/// Drop the oldest entries beyond [`AUDIT_LOG_CAPACITY`].
pub fn trim_audit(entries: &mut Vec<AuditEntry>) {
    let excess = entries.len().saturating_sub(AUDIT_LOG_CAPACITY);
    if excess > 0 {
        entries.drain(..excess);
    }
}

// ---------------------------------------------------------------------------
// InMemoryStorage
// ---------------------------------------------------------------------------

/// A volatile [`InsightStore`] backed by [`hashbrown::HashMap`].
///
/// All data lives in process memory and is lost when the store is dropped.
/// Cloning copies the data; use [`SharedStorage`] to share one instance.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::registry::FeatureId;
/// use insight_governance_core::storage::{InMemoryStorage, InsightStore};
///
/// let mut store = InMemoryStorage::new();
/// store.set_rollout_percent(FeatureId::FundingWatch, 10);
/// assert_eq!(store.rollout_percent(FeatureId::FundingWatch), Some(10));
/// assert_eq!(store.rollout_percent(FeatureId::PositionRisk), None);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    /// Key: `"{feature}:{context_hash}"` → cache entry.
    cache: HashMap<String, CacheEntry>,
    budget: HashMap<FeatureId, BudgetCounter>,
    /// Bounded, oldest first.
    audit: Vec<AuditEntry>,
    runtime_enabled: Option<bool>,
    feature_enabled: HashMap<FeatureId, bool>,
    rollout_percent: HashMap<FeatureId, u8>,
}

impl InMemoryStorage {
    /// Create a new, empty [`InMemoryStorage`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl InsightStore for InMemoryStorage {
    fn get_cache(&self, key: &str) -> Option<CacheEntry> {
        self.cache.get(key).cloned()
    }

    fn set_cache(&mut self, key: &str, entry: CacheEntry) {
        self.cache.insert(key.to_owned(), entry);
    }

    fn retain_cache(&mut self, keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, entry| keep(key, entry));
        before - self.cache.len()
    }

    fn get_budget(&self, feature: FeatureId) -> Option<BudgetCounter> {
        self.budget.get(&feature).cloned()
    }

    fn set_budget(&mut self, feature: FeatureId, counter: BudgetCounter) {
        self.budget.insert(feature, counter);
    }

    fn append_audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
        trim_audit(&mut self.audit);
    }

    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        filter_audit(&self.audit, filter)
    }

    fn runtime_enabled(&self) -> Option<bool> {
        self.runtime_enabled
    }

    fn set_runtime_enabled(&mut self, enabled: bool) {
        self.runtime_enabled = Some(enabled);
    }

    fn feature_enabled(&self, feature: FeatureId) -> Option<bool> {
        self.feature_enabled.get(&feature).copied()
    }

    fn set_feature_enabled(&mut self, feature: FeatureId, enabled: bool) {
        self.feature_enabled.insert(feature, enabled);
    }

    fn rollout_percent(&self, feature: FeatureId) -> Option<u8> {
        self.rollout_percent.get(&feature).copied()
    }

    fn set_rollout_percent(&mut self, feature: FeatureId, percent: u8) {
        self.rollout_percent.insert(feature, percent.min(100));
    }
}

// ---------------------------------------------------------------------------
// SharedStorage
// ---------------------------------------------------------------------------

/// Cheaply clonable handle to one store instance behind `Arc<Mutex<S>>`.
///
/// The lock is only held for the duration of a single store call and never
/// across an `.await`.
#[derive(Debug, Default)]
pub struct SharedStorage<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStorage<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: InsightStore> SharedStorage<S> {
    pub fn new(store: S) -> Self {
        Self { inner: Arc::new(Mutex::new(store)) }
    }

    /// Run `f` against the wrapped store.
    ///
    /// Used for backend-specific operations such as reloading a file store.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        // A panic while holding the lock cannot leave a store half-written in
        // a way later reads care about.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: InsightStore> InsightStore for SharedStorage<S> {
    fn get_cache(&self, key: &str) -> Option<CacheEntry> {
        self.lock().get_cache(key)
    }

    fn set_cache(&mut self, key: &str, entry: CacheEntry) {
        self.lock().set_cache(key, entry);
    }

    fn retain_cache(&mut self, keep: &mut dyn FnMut(&str, &CacheEntry) -> bool) -> usize {
        self.lock().retain_cache(keep)
    }

    fn get_budget(&self, feature: FeatureId) -> Option<BudgetCounter> {
        self.lock().get_budget(feature)
    }

    fn set_budget(&mut self, feature: FeatureId, counter: BudgetCounter) {
        self.lock().set_budget(feature, counter);
    }

    fn append_audit(&mut self, entry: AuditEntry) {
        self.lock().append_audit(entry);
    }

    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.lock().query_audit(filter)
    }

    fn runtime_enabled(&self) -> Option<bool> {
        self.lock().runtime_enabled()
    }

    fn set_runtime_enabled(&mut self, enabled: bool) {
        self.lock().set_runtime_enabled(enabled);
    }

    fn feature_enabled(&self, feature: FeatureId) -> Option<bool> {
        self.lock().feature_enabled(feature)
    }

    fn set_feature_enabled(&mut self, feature: FeatureId, enabled: bool) {
        self.lock().set_feature_enabled(feature, enabled);
    }

    fn rollout_percent(&self, feature: FeatureId) -> Option<u8> {
        self.lock().rollout_percent(feature)
    }

    fn set_rollout_percent(&mut self, feature: FeatureId, percent: u8) {
        self.lock().set_rollout_percent(feature, percent);
    }

    fn refresh(&mut self) {
        self.lock().refresh();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
