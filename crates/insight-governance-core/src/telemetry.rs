// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Quality telemetry sink.
//!
//! Fire-and-forget: a sink cannot fail the request that reports to it.

use crate::registry::FeatureId;
use crate::types::{ContractStatus, PolicyReason, Verdict};

/// One contract-quality observation.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityEvent<'a> {
    pub feature: FeatureId,
    pub status: ContractStatus,
    pub confidence: f64,
    pub verdict: Verdict,
    pub reasons: &'a [PolicyReason],
}

/// Receives contract-quality observations.
pub trait QualitySink: Send + Sync {
    fn record_quality(&self, event: &QualityEvent<'_>);
}

/// Emits each observation as a `tracing` event on target `insight.quality`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingQualitySink;

impl QualitySink for TracingQualitySink {
    fn record_quality(&self, event: &QualityEvent<'_>) {
        let reasons: Vec<&str> = event.reasons.iter().map(|reason| reason.as_str()).collect();
        tracing::info!(
            target: "insight.quality",
            feature = %event.feature,
            status = %event.status,
            confidence = event.confidence,
            verdict = %event.verdict,
            reasons = ?reasons,
            "contract quality"
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQualitySink;

impl QualitySink for NoopQualitySink {
    fn record_quality(&self, _event: &QualityEvent<'_>) {}
}
