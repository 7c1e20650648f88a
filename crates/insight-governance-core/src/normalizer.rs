// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Contract normalizer.
//!
//! Turns raw provider text into a validated [`InsightContract`].  The ladder
//! has three tiers and the first success wins:
//!
//! 1. **Structured parse** - direct JSON, then a fenced code block, then the
//!    span between the first `{` and the last `}`.  Required fields are
//!    checked and the rest coerced.  Status [`ContractStatus::Validated`].
//! 2. **Repair** - salvage fields from an object tier 1 could parse but not
//!    validate, else scan `risk:` / `action:` / `evidence:` labelled lines,
//!    else take the first two sentences.  Status [`ContractStatus::Repaired`].
//! 3. **Fallback** - the feature's static fallback template run through the
//!    repair tier, or canonical generic text.  Status
//!    [`ContractStatus::Fallback`].
//!
//! The ladder is total: every input yields a contract that satisfies
//! [`InsightContract::satisfies_invariants`].

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::context::{
    as_finite, as_text, clip_chars, collect_source_ids, first_finite, first_text, lookup,
};
use crate::policy::COVERAGE_PATHS;
use crate::registry::FeatureConfig;
use crate::risk::input::parse_holdings;
use crate::types::{ContractStatus, InsightContract, Severity, CONTRACT_SCHEMA_VERSION};

/// Maximum evidence items on any contract.
pub const MAX_EVIDENCE_ITEMS: usize = 4;

/// Canonical risk text when nothing usable could be recovered.
pub const GENERIC_RISK: &str = "Risk is unclear.";

/// Canonical action text when nothing usable could be recovered.
pub const GENERIC_ACTION: &str = "Review exposure and risk controls.";

const MAX_TEXT_CHARS: usize = 280;
const MAX_EVIDENCE_CHARS: usize = 160;

const REPAIRED_CONFIDENCE_FLOOR: f64 = 0.52;
const FALLBACK_CONFIDENCE_FLOOR: f64 = 0.45;

const EVIDENCE_FILLERS: &[&str] = &[
    "Based on the latest portfolio snapshot.",
    "No further supporting data was available.",
    "Derived from deterministic portfolio rules.",
    "Review the underlying positions for detail.",
];

/// Run the full ladder.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::normalizer::normalize;
/// use insight_governance_core::registry::{lookup, FeatureId};
/// use insight_governance_core::types::ContractStatus;
///
/// let config = lookup(FeatureId::PortfolioOverview);
/// let raw = "Risk: BTC is 70% of the book.\nAction: Trim BTC toward 40%.";
/// let (contract, status) = normalize(raw, config, &serde_json::json!({}), 1_000);
/// assert_eq!(status, ContractStatus::Repaired);
/// assert_eq!(contract.risk, "BTC is 70% of the book.");
/// ```
pub fn normalize(
    raw: &str,
    config: &FeatureConfig,
    context: &Value,
    now_ms: u64,
) -> (InsightContract, ContractStatus) {
    let parsed = parse_structured(raw);

    if let Some(contract) = parsed
        .as_ref()
        .and_then(|object| validate_structured(object, config, context, now_ms))
    {
        return (contract, ContractStatus::Validated);
    }

    let fields = match parsed.as_ref().map(salvage_object) {
        Some(fields) if fields.labelled => fields,
        _ => extract_fields(raw),
    };
    if let Some(contract) = build_repaired(fields, config, context, now_ms) {
        return (contract, ContractStatus::Repaired);
    }

    (fallback_contract(config, context, now_ms), ContractStatus::Fallback)
}

/// Deterministic contract built only from the feature's fallback template.
pub fn fallback_contract(config: &FeatureConfig, context: &Value, now_ms: u64) -> InsightContract {
    let template = config.build_fallback_text(context);
    let mut contract = build_repaired(extract_fields(&template), config, context, now_ms)
        .unwrap_or_else(|| InsightContract {
            schema_version: CONTRACT_SCHEMA_VERSION,
            risk: GENERIC_RISK.to_owned(),
            action: GENERIC_ACTION.to_owned(),
            confidence: 0.0,
            evidence: synthesize_evidence(context, config.thresholds.min_evidence_items),
            expires_at: now_ms.saturating_add(config.cache_ttl_ms),
        });
    contract.confidence = config
        .thresholds
        .min_confidence
        .max(FALLBACK_CONFIDENCE_FLOOR)
        .clamp(0.45, 0.75);
    contract
}

/// Risk text stamped on contracts served while generation is switched off.
pub const DISABLED_RISK: &str = "AI insights are switched off; showing the baseline assessment.";

/// Fallback contract marked as served with generation disabled.
pub fn disabled_contract(config: &FeatureConfig, context: &Value, now_ms: u64) -> InsightContract {
    InsightContract {
        risk: DISABLED_RISK.to_owned(),
        ..fallback_contract(config, context, now_ms)
    }
}

// ---------------------------------------------------------------------------
// Tier 1: structured parse
// ---------------------------------------------------------------------------

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an info string such as ```json.
    let body_start = match after.find('\n') {
        Some(newline) if !after[..newline].contains('{') => newline + 1,
        _ => 0,
    };
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the first JSON object found by the three strategies, in order.
pub fn parse_structured(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    parse_object(trimmed)
        .or_else(|| strip_fence(trimmed).and_then(parse_object))
        .or_else(|| brace_span(trimmed).and_then(parse_object))
}

fn validate_structured(
    object: &Map<String, Value>,
    config: &FeatureConfig,
    context: &Value,
    now_ms: u64,
) -> Option<InsightContract> {
    let risk = object.get("risk")?.as_str()?.trim();
    let action = object.get("action")?.as_str()?.trim();
    // Blank text is as unusable here as in the repair tier.
    if risk.is_empty() || action.is_empty() {
        return None;
    }

    let mut evidence = coerce_evidence(object.get("evidence"));
    if evidence.is_empty() {
        evidence = synthesize_evidence(context, config.thresholds.min_evidence_items);
    }

    Some(InsightContract {
        schema_version: CONTRACT_SCHEMA_VERSION,
        risk: clip_chars(risk, MAX_TEXT_CHARS),
        action: clip_chars(action, MAX_TEXT_CHARS),
        confidence: coerce_confidence(object.get("confidence"), config.default_confidence),
        evidence,
        expires_at: coerce_expires_at(
            object.get("expiresAt").or_else(|| object.get("expires_at")),
            now_ms,
            config.cache_ttl_ms,
        ),
    })
}

/// Coerce into `[0, 1]`.  Percentages (`1 < x <= 100`) are scaled down.
pub fn coerce_confidence(value: Option<&Value>, default: f64) -> f64 {
    match value.and_then(as_finite) {
        Some(raw) if raw > 1.0 && raw <= 100.0 => raw / 100.0,
        Some(raw) => raw.clamp(0.0, 1.0),
        None if default.is_finite() => default.clamp(0.0, 1.0),
        None => 0.0,
    }
}

fn clean_evidence_item(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| clip_chars(trimmed, MAX_EVIDENCE_CHARS))
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if items.len() < MAX_EVIDENCE_ITEMS && !items.contains(&item) {
        items.push(item);
    }
}

/// Coerce into at most four trimmed, non-empty strings.
pub fn coerce_evidence(value: Option<&Value>) -> Vec<String> {
    let mut evidence = Vec::new();
    match value {
        Some(Value::Array(items)) => {
            for item in items.iter().filter_map(as_text) {
                if let Some(cleaned) = clean_evidence_item(&item) {
                    push_unique(&mut evidence, cleaned);
                }
            }
        }
        Some(Value::String(text)) => {
            if let Some(cleaned) = clean_evidence_item(text) {
                evidence.push(cleaned);
            }
        }
        _ => {}
    }
    evidence
}

fn parse_date_ms(text: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

/// Coerce into an epoch ms not earlier than `now_ms`; otherwise `now + ttl`.
pub fn coerce_expires_at(value: Option<&Value>, now_ms: u64, ttl_ms: u64) -> u64 {
    let default = now_ms.saturating_add(ttl_ms);
    let parsed = match value {
        Some(node) => match as_finite(node) {
            Some(number) if number >= 0.0 => Some(number as u64),
            Some(_) => None,
            None => node
                .as_str()
                .and_then(|text| parse_date_ms(text.trim()))
                .and_then(|ms| u64::try_from(ms).ok()),
        },
        None => None,
    };
    match parsed {
        Some(expires_at) if expires_at >= now_ms => expires_at,
        _ => default,
    }
}

// ---------------------------------------------------------------------------
// Tier 2: repair
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RepairFields {
    risk: Option<String>,
    action: Option<String>,
    evidence: Vec<String>,
    /// At least one `risk` / `action` / `evidence` label was present.
    labelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Risk,
    Action,
    Evidence,
}

fn salvage_object(object: &Map<String, Value>) -> RepairFields {
    RepairFields {
        risk: object.get("risk").and_then(as_text),
        action: object.get("action").and_then(as_text),
        evidence: coerce_evidence(object.get("evidence")),
        labelled: ["risk", "action", "evidence"]
            .iter()
            .any(|key| object.contains_key(*key)),
    }
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*'))
        .trim()
        .to_owned()
}

fn split_label(line: &str) -> Option<(Label, String)> {
    let cleaned = line.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '*' | '#' | '>' | '"' | '\'' | '{' | '•')
    });
    let colon = cleaned.find(':')?;
    let key = cleaned[..colon]
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '_'))
        .to_ascii_lowercase();
    let label = match key.as_str() {
        "risk" => Label::Risk,
        "action" => Label::Action,
        "evidence" => Label::Evidence,
        _ => return None,
    };
    Some((label, clean_value(&cleaned[colon + 1..])))
}

fn bullet_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('*'))
        .or_else(|| trimmed.strip_prefix('•'))
        .or_else(|| {
            let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
            (digits > 0)
                .then(|| &trimmed[digits..])
                .and_then(|tail| tail.strip_prefix('.').or_else(|| tail.strip_prefix(')')))
        })?;
    Some(rest.trim())
}

fn scan_labelled_lines(raw: &str) -> RepairFields {
    let mut fields = RepairFields::default();
    let mut in_evidence = false;

    for line in raw.lines() {
        if let Some((label, value)) = split_label(line) {
            fields.labelled = true;
            in_evidence = label == Label::Evidence;
            match label {
                // First non-blank value per label wins.
                Label::Risk if fields.risk.is_none() && !value.is_empty() => fields.risk = Some(value),
                Label::Action if fields.action.is_none() && !value.is_empty() => {
                    fields.action = Some(value);
                }
                Label::Evidence => {
                    for item in value.split(';').filter_map(clean_evidence_item) {
                        push_unique(&mut fields.evidence, item);
                    }
                }
                _ => {}
            }
            continue;
        }
        match bullet_item(line) {
            Some(item) if in_evidence => {
                if let Some(cleaned) = clean_evidence_item(&clean_value(item)) {
                    push_unique(&mut fields.evidence, cleaned);
                }
            }
            _ => in_evidence = in_evidence && line.trim().is_empty(),
        }
    }

    fields
}

fn flatten(raw: &str) -> String {
    raw.replace("```", " ")
        .chars()
        .map(|c| if matches!(c, '{' | '}' | '[' | ']' | '"' | '`') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if boundary {
            out.push(std::mem::take(&mut current));
        }
    }
    out.push(current);

    out.into_iter()
        .map(|sentence| sentence.trim().to_owned())
        .filter(|sentence| sentence.chars().any(char::is_alphabetic))
        .collect()
}

fn extract_fields(raw: &str) -> RepairFields {
    let fields = scan_labelled_lines(raw);
    if fields.labelled {
        return fields;
    }
    let mut sentences = sentences(&flatten(raw)).into_iter();
    RepairFields {
        risk: sentences.next(),
        action: sentences.next(),
        evidence: Vec::new(),
        labelled: false,
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|value| !value.trim().is_empty())
}

fn build_repaired(
    fields: RepairFields,
    config: &FeatureConfig,
    context: &Value,
    now_ms: u64,
) -> Option<InsightContract> {
    let risk = non_blank(fields.risk);
    let action = non_blank(fields.action);
    if risk.is_none() && action.is_none() {
        return None;
    }

    let evidence = if fields.evidence.is_empty() {
        synthesize_evidence(context, config.thresholds.min_evidence_items)
    } else {
        fields.evidence
    };

    Some(InsightContract {
        schema_version: CONTRACT_SCHEMA_VERSION,
        risk: clip_chars(risk.as_deref().unwrap_or(GENERIC_RISK).trim(), MAX_TEXT_CHARS),
        action: clip_chars(action.as_deref().unwrap_or(GENERIC_ACTION).trim(), MAX_TEXT_CHARS),
        confidence: config
            .thresholds
            .min_confidence
            .max(REPAIRED_CONFIDENCE_FLOOR)
            .clamp(0.4, 0.75),
        evidence,
        expires_at: now_ms.saturating_add(config.cache_ttl_ms),
    })
}

// ---------------------------------------------------------------------------
// Evidence synthesis
// ---------------------------------------------------------------------------

fn top_holding_evidence(context: &Value) -> Option<String> {
    if let Some(node) = lookup(context, "topHolding") {
        let symbol = first_text(node, &["symbol", "asset", "coin"]);
        let pct = first_finite(node, &["allocationPct", "weightPct", "pct"]);
        if let (Some(symbol), Some(pct)) = (symbol, pct) {
            return Some(format!("{symbol} is {pct:.1}% of portfolio value"));
        }
    }

    let holdings = parse_holdings(context);
    let total: f64 = holdings.iter().map(|holding| holding.value_usd).sum();
    if total <= 0.0 {
        return None;
    }
    let top = holdings
        .iter()
        .max_by(|a, b| a.value_usd.total_cmp(&b.value_usd))?;
    Some(format!(
        "{} is {:.1}% of portfolio value",
        top.symbol,
        top.value_usd / total * 100.0
    ))
}

fn risk_signal_evidence(context: &Value) -> Vec<String> {
    let Some(Value::Array(signals)) = lookup(context, "riskSignals") else {
        return Vec::new();
    };
    signals
        .iter()
        .filter(|signal| {
            lookup(signal, "severity")
                .and_then(Value::as_str)
                .and_then(Severity::parse_loose)
                .map_or(true, |severity| severity > Severity::Info)
        })
        .filter_map(|signal| {
            first_text(signal, &["summary", "description"])
                .or_else(|| match lookup(signal, "evidence") {
                    Some(Value::Array(items)) => items.iter().find_map(as_text),
                    _ => None,
                })
                .or_else(|| {
                    let rule = first_text(signal, &["ruleId", "id"])?;
                    let severity = first_text(signal, &["severity"])
                        .unwrap_or_else(|| "flagged".to_owned());
                    Some(format!("{rule} is {severity}"))
                })
        })
        .take(2)
        .collect()
}

/// Evidence synthesised from the context when none was parsed.
///
/// Priority: top holding allocation, up to two risk-signal descriptions, data
/// coverage, up to two provenance tokens, then generic filler until
/// `max(1, min(4, min_evidence_items))` items exist.  Never more than four.
pub fn synthesize_evidence(context: &Value, min_evidence_items: usize) -> Vec<String> {
    let target = min_evidence_items.clamp(1, MAX_EVIDENCE_ITEMS);
    let mut evidence: Vec<String> = Vec::new();

    if let Some(item) = top_holding_evidence(context) {
        push_unique(&mut evidence, item);
    }
    for item in risk_signal_evidence(context) {
        push_unique(&mut evidence, clip_chars(&item, MAX_EVIDENCE_CHARS));
    }
    if let Some(coverage) = first_finite(context, COVERAGE_PATHS) {
        let pct = if coverage <= 1.0 { coverage * 100.0 } else { coverage };
        push_unique(&mut evidence, format!("Data coverage {:.0}%", pct.clamp(0.0, 100.0)));
    }
    for source in collect_source_ids(context).into_iter().take(2) {
        push_unique(&mut evidence, format!("Source: {source}"));
    }
    for filler in EVIDENCE_FILLERS {
        if evidence.len() >= target {
            break;
        }
        push_unique(&mut evidence, (*filler).to_owned());
    }

    evidence
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{lookup as feature, FeatureId};
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    fn overview() -> &'static FeatureConfig {
        feature(FeatureId::PortfolioOverview)
    }

    #[test]
    fn direct_json_is_validated() {
        let raw = r#"{"risk":"BTC dominates.","action":"Trim BTC.","confidence":0.8,
                      "evidence":["BTC 70%"," ","ETH 10%"],"expiresAt":1700000600000}"#;
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Validated);
        assert_eq!(contract.confidence, 0.8);
        assert_eq!(contract.evidence, vec!["BTC 70%", "ETH 10%"]);
        assert_eq!(contract.expires_at, 1_700_000_600_000);
    }

    #[test]
    fn fenced_and_embedded_json_are_validated() {
        let fenced = "Here you go:\n```json\n{\"risk\":\"r\",\"action\":\"a\"}\n```\nThanks";
        assert_eq!(normalize(fenced, overview(), &json!({}), NOW).1, ContractStatus::Validated);

        let embedded = "Sure! {\"risk\":\"r\",\"action\":\"a\",\"confidence\":\"0.7\"} done";
        let (contract, status) = normalize(embedded, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Validated);
        assert_eq!(contract.confidence, 0.7);
    }

    #[test]
    fn confidence_and_expiry_are_coerced() {
        assert_eq!(coerce_confidence(Some(&json!(85)), 0.6), 0.85);
        assert_eq!(coerce_confidence(Some(&json!(-3)), 0.6), 0.0);
        assert_eq!(coerce_confidence(Some(&json!(250)), 0.6), 1.0);
        assert_eq!(coerce_confidence(Some(&json!("high")), 0.6), 0.6);
        assert_eq!(coerce_confidence(None, 0.6), 0.6);

        let ttl = 1_000;
        assert_eq!(coerce_expires_at(Some(&json!("1700000005000")), NOW, ttl), NOW + 5_000);
        assert_eq!(coerce_expires_at(Some(&json!(5)), NOW, ttl), NOW + ttl);
        assert_eq!(coerce_expires_at(Some(&json!("tomorrow")), NOW, ttl), NOW + ttl);
        assert_eq!(
            coerce_expires_at(Some(&json!("2030-01-01T00:00:00Z")), NOW, ttl),
            1_893_456_000_000
        );
        assert_eq!(coerce_expires_at(Some(&json!("2030-01-01")), NOW, ttl), 1_893_456_000_000);
    }

    #[test]
    fn non_string_risk_falls_through_to_repair() {
        let raw = r#"{"risk": 42, "action": "Hedge the book."}"#;
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Repaired);
        assert_eq!(contract.risk, "42");
        assert_eq!(contract.action, "Hedge the book.");
    }

    #[test]
    fn blank_label_lines_do_not_shadow_later_values() {
        let raw = "Risk:\nRisk: BTC dominates.\nAction:   \nAction: Trim BTC.";
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Repaired);
        assert_eq!(contract.risk, "BTC dominates.");
        assert_eq!(contract.action, "Trim BTC.");
    }

    #[test]
    fn blank_structured_fields_are_not_validated() {
        let raw = r#"{"risk": "  ", "action": "Hedge the book."}"#;
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Repaired);
        assert_eq!(contract.risk, GENERIC_RISK);

        let raw = r#"{"risk": "", "action": ""}"#;
        assert_eq!(normalize(raw, overview(), &json!({}), NOW).1, ContractStatus::Fallback);
    }

    #[test]
    fn labelled_lines_are_repaired() {
        let raw = "**Risk:** Leverage is high.\n- Action: Reduce leverage.\nEvidence:\n- BTC 12x\n- liq 4% away\n\nThanks!";
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Repaired);
        assert_eq!(contract.risk, "Leverage is high.");
        assert_eq!(contract.action, "Reduce leverage.");
        assert_eq!(contract.evidence, vec!["BTC 12x", "liq 4% away"]);
        // max(0.52, 0.55) clamped into [0.4, 0.75]
        assert_eq!(contract.confidence, 0.55);
        assert_eq!(contract.expires_at, NOW + overview().cache_ttl_ms);
    }

    #[test]
    fn prose_is_repaired_from_sentences() {
        let raw = "Your portfolio leans heavily on ETH. Consider diversifying. Also more text.";
        let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
        assert_eq!(status, ContractStatus::Repaired);
        assert_eq!(contract.risk, "Your portfolio leans heavily on ETH.");
        assert_eq!(contract.action, "Consider diversifying.");
        assert!(contract.evidence.len() >= 2);
    }

    #[test]
    fn garbage_falls_back_to_template() {
        for raw in ["", "   ", "{}", "```\n```", "!!! ???", "[1,2,3]"] {
            let (contract, status) = normalize(raw, overview(), &json!({}), NOW);
            assert_eq!(status, ContractStatus::Fallback, "raw = {raw:?}");
            assert!(contract.satisfies_invariants(NOW));
            assert_eq!(contract.confidence, 0.55);
        }
    }

    #[test]
    fn every_feature_always_yields_a_valid_contract() {
        let inputs = [
            "",
            "{\"risk\": null}",
            "risk:\naction:",
            "Action: only action here",
            "{\"risk\":\"x\",\"action\":\"y\",\"evidence\":[1,2,3,4,5,6],\"confidence\":\"NaN\"}",
            "garbled \u{0}\u{1} bytes",
        ];
        for feature_id in FeatureId::ALL {
            for raw in inputs {
                let (contract, _) = normalize(raw, feature(feature_id), &json!({}), NOW);
                assert!(contract.satisfies_invariants(NOW), "{feature_id} / {raw:?}");
            }
        }
    }

    #[test]
    fn evidence_synthesis_follows_priority() {
        let context = json!({
            "holdings": [
                { "symbol": "BTC", "valueUsd": 7000 },
                { "symbol": "ETH", "valueUsd": 3000 }
            ],
            "riskSignals": [
                { "ruleId": "concentration", "severity": "critical", "summary": "BTC concentration critical" },
                { "ruleId": "funding_drag", "severity": "info", "summary": "ignored" }
            ],
            "dataCoverage": 0.8,
            "venue": "hyperliquid"
        });
        let evidence = synthesize_evidence(&context, 2);
        assert_eq!(
            evidence,
            vec![
                "BTC is 70.0% of portfolio value",
                "BTC concentration critical",
                "Data coverage 80%",
                "Source: hyperliquid",
            ]
        );
    }

    #[test]
    fn evidence_synthesis_pads_to_target() {
        assert_eq!(synthesize_evidence(&json!({}), 0).len(), 1);
        assert_eq!(synthesize_evidence(&json!({}), 3).len(), 3);
        assert_eq!(synthesize_evidence(&json!({}), 9).len(), MAX_EVIDENCE_ITEMS);
    }
}
