// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Static feature registry.
//!
//! Every insight surface on the dashboard is a [`FeatureId`] with exactly one
//! immutable [`FeatureConfig`].  The table is built at compile time, so
//! [`lookup`] cannot fail for a known feature and configs never change for the
//! lifetime of the process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{clip_chars, first_finite, first_text, lookup as lookup_path};
use crate::error::InsightError;
use crate::types::PolicyThresholds;

/// Upper bound on the serialised context embedded in a prompt.
const PROMPT_CONTEXT_CHARS: usize = 6_000;

/// Builds text from a request context.
pub type TextBuilder = fn(&Value) -> String;

/// Identifier of a dashboard insight surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureId {
    PortfolioOverview,
    PositionRisk,
    FundingWatch,
    TransferReview,
}

impl FeatureId {
    /// Every declared feature, in registry order.
    pub const ALL: [FeatureId; 4] = [
        FeatureId::PortfolioOverview,
        FeatureId::PositionRisk,
        FeatureId::FundingWatch,
        FeatureId::TransferReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureId::PortfolioOverview => "portfolio_overview",
            FeatureId::PositionRisk      => "position_risk",
            FeatureId::FundingWatch      => "funding_watch",
            FeatureId::TransferReview    => "transfer_review",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureId {
    type Err = InsightError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        FeatureId::ALL
            .into_iter()
            .find(|feature| feature.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| InsightError::UnknownFeature(wanted.to_owned()))
    }
}

/// Immutable per-feature configuration.
#[derive(Debug, Clone, Copy)]
pub struct FeatureConfig {
    pub id: FeatureId,
    /// Lifetime of a cached contract.
    pub cache_ttl_ms: u64,
    /// Maximum provider calls per UTC day.
    pub daily_budget: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Confidence used when structured output omits or garbles the field.
    pub default_confidence: f64,
    pub thresholds: PolicyThresholds,
    pub default_enabled: bool,
    /// Share of (feature, context) buckets that receive real generation.
    pub default_rollout_percent: u8,
    /// Route this feature to a specific provider regardless of defaults.
    pub forced_provider: Option<&'static str>,
    pub prompt_builder: TextBuilder,
    pub fallback_builder: TextBuilder,
}

impl FeatureConfig {
    pub fn build_prompt(&self, context: &Value) -> String {
        (self.prompt_builder)(context)
    }

    pub fn build_fallback_text(&self, context: &Value) -> String {
        (self.fallback_builder)(context)
    }
}

static REGISTRY: [FeatureConfig; 4] = [
    FeatureConfig {
        id: FeatureId::PortfolioOverview,
        cache_ttl_ms: 10 * 60_000,
        daily_budget: 40,
        max_tokens: 320,
        temperature: 0.3,
        default_confidence: 0.6,
        thresholds: PolicyThresholds {
            min_confidence: 0.55,
            max_context_age_ms: 600_000,
            min_evidence_items: 2,
            min_data_coverage: 0.5,
        },
        default_enabled: true,
        default_rollout_percent: 100,
        forced_provider: None,
        prompt_builder: portfolio_overview_prompt,
        fallback_builder: portfolio_overview_fallback,
    },
    FeatureConfig {
        id: FeatureId::PositionRisk,
        cache_ttl_ms: 5 * 60_000,
        daily_budget: 60,
        max_tokens: 280,
        temperature: 0.2,
        default_confidence: 0.62,
        thresholds: PolicyThresholds {
            min_confidence: 0.6,
            max_context_age_ms: 300_000,
            min_evidence_items: 2,
            min_data_coverage: 0.6,
        },
        default_enabled: true,
        default_rollout_percent: 100,
        forced_provider: Some("reasoning"),
        prompt_builder: position_risk_prompt,
        fallback_builder: position_risk_fallback,
    },
    FeatureConfig {
        id: FeatureId::FundingWatch,
        cache_ttl_ms: 15 * 60_000,
        daily_budget: 24,
        max_tokens: 220,
        temperature: 0.2,
        default_confidence: 0.58,
        thresholds: PolicyThresholds {
            min_confidence: 0.5,
            max_context_age_ms: 900_000,
            min_evidence_items: 1,
            min_data_coverage: 0.5,
        },
        default_enabled: true,
        default_rollout_percent: 50,
        forced_provider: None,
        prompt_builder: funding_watch_prompt,
        fallback_builder: funding_watch_fallback,
    },
    FeatureConfig {
        id: FeatureId::TransferReview,
        cache_ttl_ms: 30 * 60_000,
        daily_budget: 20,
        max_tokens: 260,
        temperature: 0.3,
        default_confidence: 0.56,
        thresholds: PolicyThresholds {
            min_confidence: 0.55,
            max_context_age_ms: 1_800_000,
            min_evidence_items: 2,
            min_data_coverage: 0.4,
        },
        default_enabled: true,
        default_rollout_percent: 100,
        forced_provider: Some("reasoning"),
        prompt_builder: transfer_review_prompt,
        fallback_builder: transfer_review_fallback,
    },
];

/// Configuration for `feature`.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::registry::{lookup, FeatureId};
///
/// let config = lookup(FeatureId::FundingWatch);
/// assert_eq!(config.id, FeatureId::FundingWatch);
/// ```
pub fn lookup(feature: FeatureId) -> &'static FeatureConfig {
    match feature {
        FeatureId::PortfolioOverview => &REGISTRY[0],
        FeatureId::PositionRisk      => &REGISTRY[1],
        FeatureId::FundingWatch      => &REGISTRY[2],
        FeatureId::TransferReview    => &REGISTRY[3],
    }
}

/// All registered configs.
pub fn all() -> &'static [FeatureConfig] {
    &REGISTRY
}

// ---------------------------------------------------------------------------
// Prompt builders
// ---------------------------------------------------------------------------

fn render_context(context: &Value) -> String {
    let rendered = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_owned());
    clip_chars(&rendered, PROMPT_CONTEXT_CHARS)
}

fn prompt(task: &str, context: &Value) -> String {
    format!(
        "{task}\n\
         Reply with risk (one sentence), action (one sentence), confidence (0-1), \
         evidence (up to 4 short facts from the snapshot) and expiresAt (epoch ms).\n\
         Portfolio snapshot:\n{}",
        render_context(context)
    )
}

fn portfolio_overview_prompt(context: &Value) -> String {
    prompt(
        "Summarise the single most important portfolio-level risk and the next action.",
        context,
    )
}

fn position_risk_prompt(context: &Value) -> String {
    prompt(
        "Assess leverage, liquidation distance and stop-loss coverage of open positions.",
        context,
    )
}

fn funding_watch_prompt(context: &Value) -> String {
    prompt("Assess the drag of perpetual funding payments on equity over the last 24h.", context)
}

fn transfer_review_prompt(context: &Value) -> String {
    prompt(
        "Review the last 7 days of transfers for unusual size, route concentration and fees.",
        context,
    )
}

// ---------------------------------------------------------------------------
// Fallback builders
// ---------------------------------------------------------------------------

fn top_symbol(context: &Value) -> Option<String> {
    lookup_path(context, "topHolding")
        .and_then(|node| first_text(node, &["symbol", "asset"]))
        .or_else(|| first_text(context, &["topSymbol"]))
}

fn portfolio_overview_fallback(context: &Value) -> String {
    match top_symbol(context) {
        Some(symbol) => format!(
            "Risk: Exposure is concentrated in {symbol}.\n\
             Action: Review position sizing and rebalance if the allocation exceeds your limits."
        ),
        None => "Risk: Portfolio risk could not be assessed from the current snapshot.\n\
                 Action: Review allocation and risk controls before adding exposure."
            .to_owned(),
    }
}

fn position_risk_fallback(_context: &Value) -> String {
    "Risk: Leveraged positions may be exposed to liquidation on a sharp move.\n\
     Action: Confirm stop-loss orders and reduce leverage on the largest positions."
        .to_owned()
}

fn funding_watch_fallback(context: &Value) -> String {
    match first_finite(context, &["funding24hUsd", "fundingOutflow24hUsd"]) {
        Some(amount) if amount.abs() > 0.0 => format!(
            "Risk: Funding payments of ${:.2} over 24h are eroding equity.\n\
             Action: Review funding rates and trim positions paying the highest funding.",
            amount.abs()
        ),
        _ => "Risk: Funding costs may be eroding equity.\n\
              Action: Review funding rates on open perpetual positions."
            .to_owned(),
    }
}

fn transfer_review_fallback(_context: &Value) -> String {
    "Risk: Recent transfers could not be fully reviewed.\n\
     Action: Verify large transfers and compare route fees before the next move."
        .to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
