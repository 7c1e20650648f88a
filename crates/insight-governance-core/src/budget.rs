// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Daily generation budget.
//!
//! [`BudgetManager`] exposes two operations:
//!
//! * [`check`](BudgetManager::check)   - inspect today's headroom without spending
//! * [`record`](BudgetManager::record) - count one provider call against today
//!
//! Caps are static per feature.  Counters reset at UTC midnight: a counter
//! stamped with an earlier day reads as zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::FeatureConfig;
use crate::storage::InsightStore;
use crate::types::BudgetCounter;

/// UTC calendar day of `now_ms` as `YYYY-MM-DD`.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::budget::day_key;
///
/// assert_eq!(day_key(0), "1970-01-01");
/// assert_eq!(day_key(86_400_000), "1970-01-02");
/// ```
pub fn day_key(now_ms: u64) -> String {
    let millis = i64::try_from(now_ms).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Today's budget position for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub used: u32,
    pub cap: u32,
}

impl BudgetStatus {
    pub fn exhausted(&self) -> bool {
        self.used >= self.cap
    }

    pub fn remaining(&self) -> u32 {
        self.cap.saturating_sub(self.used)
    }
}

/// Per-feature, per-UTC-day call counter.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::budget::BudgetManager;
/// use insight_governance_core::registry::{lookup, FeatureId};
/// use insight_governance_core::storage::InMemoryStorage;
///
/// let config = lookup(FeatureId::TransferReview);
/// let mut budget = BudgetManager::new(InMemoryStorage::new());
///
/// assert_eq!(budget.check(config, 0).used, 0);
/// budget.record(config, 0);
/// assert_eq!(budget.check(config, 0).remaining(), config.daily_budget - 1);
/// ```
pub struct BudgetManager<S: InsightStore> {
    storage: S,
}

impl<S: InsightStore> BudgetManager<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Today's usage against the feature cap.  Does not modify any state.
    pub fn check(&self, config: &FeatureConfig, now_ms: u64) -> BudgetStatus {
        let today = day_key(now_ms);
        let used = self
            .storage
            .get_budget(config.id)
            .filter(|counter| counter.date == today)
            .map_or(0, |counter| counter.count);
        BudgetStatus { used, cap: config.daily_budget }
    }

    /// Count one call against today and return the new total.
    ///
    /// Does not re-validate the cap; call [`check`](Self::check) first.
    pub fn record(&mut self, config: &FeatureConfig, now_ms: u64) -> u32 {
        let count = self.check(config, now_ms).used.saturating_add(1);
        self.storage.set_budget(
            config.id,
            BudgetCounter { date: day_key(now_ms), count },
        );
        count
    }

    /// Borrow the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
