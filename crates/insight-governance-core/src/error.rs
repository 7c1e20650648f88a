// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error types surfaced by the governance layer.
//!
//! Malformed provider text is deliberately absent: the normalizer always
//! produces a usable contract, so "bad AI output" never reaches callers as an
//! error.  Policy blocks are verdicts, not errors.

use thiserror::Error;

pub type InsightResult<T> = Result<T, InsightError>;

/// Failure reported by a generation provider.
///
/// `Clone` so that one failed single-flight outcome can be handed to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("provider returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("provider request aborted")]
    Aborted,

    #[error("provider response malformed: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// Caller-visible failures of a request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsightError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider call timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("request cancelled by caller")]
    Cancelled,

    #[error("request key cooling down for another {remaining_ms} ms after a failure")]
    CoolingDown { remaining_ms: u64 },

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),
}

impl InsightError {
    /// Abort-class failures (timeouts and cancellations) as opposed to generic
    /// provider failures.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            InsightError::Timeout { .. }
                | InsightError::Cancelled
                | InsightError::Provider(ProviderError::Aborted)
        )
    }
}
