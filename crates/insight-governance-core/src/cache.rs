// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Contract cache.
//!
//! [`InsightCache`] exposes two operations:
//!
//! * [`fresh`](InsightCache::fresh) - a cached generation younger than the feature TTL
//! * [`store`](InsightCache::store) - freeze a generation under its request key
//!   and sweep entries that outlived their feature's TTL
//!
//! Only contract content is frozen.  Callers re-run the policy engine on every
//! hit, so a cached contract can flip from `allow` to `block` as its context
//! ages.

use tracing::debug;

use crate::registry::{lookup, FeatureConfig, FeatureId};
use crate::storage::InsightStore;
use crate::types::{CacheEntry, CachedInsight};

/// Request key: `"feature:contextHash"`.
pub fn cache_key(feature: FeatureId, context_hash: &str) -> String {
    format!("{feature}:{context_hash}")
}

/// TTL-aware view over the cache namespace of a store.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::cache::InsightCache;
/// use insight_governance_core::registry::{lookup, FeatureId};
/// use insight_governance_core::storage::InMemoryStorage;
///
/// let cache = InsightCache::new(InMemoryStorage::new());
/// assert!(cache.fresh(lookup(FeatureId::FundingWatch), "abc", 0).is_none());
/// ```
pub struct InsightCache<S: InsightStore> {
    storage: S,
}

impl<S: InsightStore> InsightCache<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Entry for `(feature, context_hash)` if it is younger than the feature's
    /// TTL at `now_ms`.
    pub fn fresh(&self, config: &FeatureConfig, context_hash: &str, now_ms: u64) -> Option<CacheEntry> {
        self.storage
            .get_cache(&cache_key(config.id, context_hash))
            .filter(|entry| now_ms.saturating_sub(entry.created_at) < config.cache_ttl_ms)
    }

    pub fn store(&mut self, feature: FeatureId, context_hash: &str, insight: CachedInsight, now_ms: u64) {
        let evicted = self.evict_expired(now_ms);
        if evicted > 0 {
            debug!(evicted, "expired cache entries dropped");
        }
        let entry = CacheEntry { created_at: now_ms, insight };
        self.storage.set_cache(&cache_key(feature, context_hash), entry);
    }

    /// Remove every entry at least as old as its feature's TTL at `now_ms`.
    /// Keys that name no known feature are removed as well.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        self.storage.retain_cache(&mut |key, entry| {
            key.split_once(':')
                .and_then(|(feature, _)| feature.parse::<FeatureId>().ok())
                .is_some_and(|feature| now_ms.saturating_sub(entry.created_at) < lookup(feature).cache_ttl_ms)
        })
    }

    /// Borrow the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
