// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error type for the evaluation harness.

use insight_governance_core::InsightError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to read fixtures \"{path}\": {source}")]
    Io { path: String, source: std::io::Error },

    #[error("failed to parse fixtures \"{path}\": {source}")]
    Json { path: String, source: serde_json::Error },

    #[error(transparent)]
    Core(#[from] InsightError),
}
