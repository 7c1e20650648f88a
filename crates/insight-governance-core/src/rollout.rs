// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Deterministic staged rollout.
//!
//! A `(feature, contextHash)` pair lands in one of 100 buckets via FNV-1a.
//! The pair is exposed when its bucket is below the rollout percentage, so the
//! same pair always gets the same answer and raising the percentage only ever
//! adds pairs.

use crate::registry::FeatureId;

/// FNV-1a 64-bit.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
    const FNV_PRIME: u64 = 1_099_511_628_211;
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Bucket in `0..100` for a request key.
pub fn rollout_bucket(feature: FeatureId, context_hash: &str) -> u8 {
    let key = format!("{feature}:{context_hash}:rollout");
    (fnv1a_64(key.as_bytes()) % 100) as u8
}

/// Whether `(feature, context_hash)` receives real generation at `percent`.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::registry::FeatureId;
/// use insight_governance_core::rollout::is_rollout_allowed;
///
/// assert!(is_rollout_allowed(FeatureId::FundingWatch, "abc", 100));
/// assert!(!is_rollout_allowed(FeatureId::FundingWatch, "abc", 0));
/// ```
pub fn is_rollout_allowed(feature: FeatureId, context_hash: &str, percent: u8) -> bool {
    rollout_bucket(feature, context_hash) < percent.min(100)
}
