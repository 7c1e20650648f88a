// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Generation provider boundary.
//!
//! The provider is untrusted: it may be slow, fail, or return text in any
//! shape.  The orchestrator bounds every call with a timeout and passes all
//! output through the normalizer.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::registry::{FeatureConfig, FeatureId};
use crate::types::TokenUsage;

/// System instruction sent with every generation request.
pub const SYSTEM_INSTRUCTION: &str = "You are a portfolio risk assistant. \
Respond with exactly one JSON object and nothing else: no prose, no markdown, no code fences. \
The object must have exactly these keys: \
\"risk\" (string, one sentence), \
\"action\" (string, one sentence), \
\"confidence\" (number between 0 and 1), \
\"evidence\" (array of at most 4 short strings), \
\"expiresAt\" (epoch milliseconds).";

/// One generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub feature: FeatureId,
    pub system: String,
    pub user: String,
    /// Ask the provider for strict JSON output.
    pub json_output: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub forced_provider: Option<String>,
}

impl GenerationRequest {
    /// Build the request for `config` with an already-rendered user prompt.
    pub fn for_feature(config: &FeatureConfig, user: String) -> Self {
        Self {
            feature: config.id,
            system: SYSTEM_INSTRUCTION.to_owned(),
            user,
            json_output: true,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            forced_provider: config.forced_provider.map(str::to_owned),
        }
    }
}

/// Completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub content: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// A generation delivered incrementally.
pub struct ProviderStream {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Text deltas in arrival order.  The stream ends when generation ends.
    pub deltas: BoxStream<'static, Result<String, ProviderError>>,
}

/// External text generator.
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError>;

    /// Streaming counterpart of [`generate`](Self::generate).
    ///
    /// The default delivers the whole blocking response as a single delta.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<ProviderStream, ProviderError> {
        let response = self.generate(request).await?;
        Ok(ProviderStream {
            provider: response.provider,
            model: response.model,
            deltas: Box::pin(futures_util::stream::iter([Ok(response.content)])),
        })
    }
}
