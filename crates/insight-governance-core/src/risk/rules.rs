// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! The six deterministic risk rules.
//!
//! Each rule maps its key metric to a severity through fixed thresholds and to
//! a 0-100 score through a monotonic transform.  Windows are measured back
//! from the snapshot time, not the wall-clock, so replaying a stored snapshot
//! reproduces the same signals.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use super::input::PortfolioSnapshot;
use super::{RiskRule, RiskSignal};
use crate::types::Severity;

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;
const WEEK_MS: u64 = 7 * DAY_MS;

/// Minimum transfers in the 7-day window before anomaly or route statistics
/// mean anything.
pub const MIN_TRANSFER_SAMPLE: usize = 3;

/// Leverage at or above which an unprotected position is critical.
pub const HIGH_LEVERAGE: f64 = 3.0;

fn grade(critical: bool, warning: bool) -> Severity {
    if critical {
        Severity::Critical
    } else if warning {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn metrics<const N: usize>(pairs: [(&str, f64); N]) -> BTreeMap<String, f64> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_owned(), round2(value)))
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn insufficient(rule: RiskRule, note: String) -> RiskSignal {
    RiskSignal::new(rule, Severity::Info, 0.0, 0.3, 0.2, vec![note], BTreeMap::new())
}

// ---------------------------------------------------------------------------
// concentration
// ---------------------------------------------------------------------------

pub fn concentration(snapshot: &PortfolioSnapshot) -> RiskSignal {
    let total: f64 = snapshot.holdings.iter().map(|holding| holding.value_usd).sum();
    let Some(top) = snapshot
        .holdings
        .iter()
        .max_by(|a, b| a.value_usd.total_cmp(&b.value_usd))
        .filter(|_| total > 0.0)
    else {
        return insufficient(RiskRule::Concentration, "No valued holdings in snapshot".to_owned());
    };

    let top_share = top.value_usd / total;
    let hhi: f64 = snapshot
        .holdings
        .iter()
        .map(|holding| (holding.value_usd / total).powi(2))
        .sum();
    let severity = grade(
        top_share >= 0.55 || hhi >= 0.38,
        top_share >= 0.35 || hhi >= 0.24,
    );

    RiskSignal::new(
        RiskRule::Concentration,
        severity,
        top_share * 100.0,
        0.9,
        1.0,
        vec![
            format!("{} is {:.1}% of portfolio value", top.symbol, top_share * 100.0),
            format!("Herfindahl index {hhi:.2} across {} holdings", snapshot.holdings.len()),
        ],
        metrics([
            ("topWeightPct", top_share * 100.0),
            ("hhi", hhi),
            ("holdingCount", snapshot.holdings.len() as f64),
        ]),
    )
}

// ---------------------------------------------------------------------------
// leverage_stress
// ---------------------------------------------------------------------------

pub fn leverage_stress(snapshot: &PortfolioSnapshot) -> RiskSignal {
    if snapshot.positions.is_empty() {
        return insufficient(RiskRule::LeverageStress, "No open positions".to_owned());
    }

    let max_leverage = snapshot
        .positions
        .iter()
        .map(|position| position.leverage)
        .fold(0.0_f64, f64::max);
    let closest = snapshot
        .positions
        .iter()
        .filter_map(|position| Some((position, position.liquidation_distance_pct()?)))
        .min_by(|a, b| a.1.total_cmp(&b.1));
    let min_distance = closest.map(|(_, distance)| distance);

    let severity = grade(
        max_leverage >= 12.0 || min_distance.is_some_and(|distance| distance <= 10.0),
        max_leverage >= 6.0 || min_distance.is_some_and(|distance| distance <= 20.0),
    );
    let leverage_score = (max_leverage / 20.0).min(1.0) * 100.0;
    let distance_score = min_distance.map_or(0.0, |distance| ((30.0 - distance) / 30.0).clamp(0.0, 1.0) * 100.0);

    let mut evidence = vec![format!("Max leverage {max_leverage:.1}x")];
    if let Some((position, distance)) = closest {
        evidence.push(format!("{} is {distance:.1}% from liquidation", position.symbol));
    }
    let known = snapshot
        .positions
        .iter()
        .filter(|position| position.liquidation_distance_pct().is_some())
        .count();

    let mut signal_metrics = metrics([
        ("maxLeverage", max_leverage),
        ("positionCount", snapshot.positions.len() as f64),
    ]);
    if let Some(distance) = min_distance {
        signal_metrics.insert("minLiquidationDistancePct".to_owned(), round2(distance));
    }

    RiskSignal::new(
        RiskRule::LeverageStress,
        severity,
        leverage_score.max(distance_score),
        0.85,
        if known == snapshot.positions.len() { 1.0 } else { 0.6 },
        evidence,
        signal_metrics,
    )
}

// ---------------------------------------------------------------------------
// stop_coverage
// ---------------------------------------------------------------------------

pub fn stop_coverage(snapshot: &PortfolioSnapshot) -> RiskSignal {
    let total = snapshot.positions.len();
    if total == 0 {
        return insufficient(RiskRule::StopCoverage, "No open positions".to_owned());
    }

    let uncovered: Vec<_> = snapshot
        .positions
        .iter()
        .filter(|position| !snapshot.is_stop_covered(position))
        .collect();
    let missing_pct = uncovered.len() as f64 / total as f64 * 100.0;
    let high_leverage_uncovered = uncovered
        .iter()
        .filter(|position| position.leverage >= HIGH_LEVERAGE)
        .count();

    let severity = grade(
        high_leverage_uncovered > 0 || missing_pct >= 60.0,
        missing_pct >= 30.0,
    );

    let mut evidence = vec![format!(
        "{} of {total} positions lack a stop-loss",
        uncovered.len()
    )];
    if let Some(position) = uncovered.iter().find(|position| position.leverage >= HIGH_LEVERAGE) {
        evidence.push(format!(
            "{} at {:.1}x has no stop-loss",
            position.symbol, position.leverage
        ));
    }

    RiskSignal::new(
        RiskRule::StopCoverage,
        severity,
        missing_pct,
        0.8,
        0.9,
        evidence,
        metrics([
            ("missingPct", missing_pct),
            ("uncoveredHighLeverage", high_leverage_uncovered as f64),
        ]),
    )
}

// ---------------------------------------------------------------------------
// funding_drag
// ---------------------------------------------------------------------------

pub fn funding_drag(snapshot: &PortfolioSnapshot) -> RiskSignal {
    let (Some(outflow), Some(equity)) = (snapshot.funding_outflow_24h_usd, snapshot.equity_usd) else {
        return insufficient(RiskRule::FundingDrag, "Funding or equity data unavailable".to_owned());
    };

    let bps = outflow / equity * 10_000.0;
    let severity = grade(bps >= 40.0, bps >= 15.0);

    RiskSignal::new(
        RiskRule::FundingDrag,
        severity,
        (bps / 60.0).min(1.0) * 100.0,
        0.8,
        0.9,
        vec![format!(
            "Funding paid ${outflow:.2} in 24h ({bps:.1} bps of equity)"
        )],
        metrics([("outflowUsd", outflow), ("equityUsd", equity), ("dragBps", bps)]),
    )
}

// ---------------------------------------------------------------------------
// transfer_anomaly / route_health
// ---------------------------------------------------------------------------

fn weekly_transfers(snapshot: &PortfolioSnapshot) -> Vec<&super::input::Transfer> {
    let since = snapshot.snapshot_ts.saturating_sub(WEEK_MS);
    snapshot
        .transfers
        .iter()
        .filter(|transfer| transfer.ts >= since && transfer.ts <= snapshot.snapshot_ts)
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    match values.len() {
        0 => 0.0,
        len if len % 2 == 0 => (values[mid - 1] + values[mid]) / 2.0,
        _ => values[mid],
    }
}

pub fn transfer_anomaly(snapshot: &PortfolioSnapshot) -> RiskSignal {
    let weekly = weekly_transfers(snapshot);
    if weekly.len() < MIN_TRANSFER_SAMPLE {
        return insufficient(
            RiskRule::TransferAnomaly,
            format!(
                "Only {} transfers in 7d; {MIN_TRANSFER_SAMPLE} needed for a baseline",
                weekly.len()
            ),
        );
    }

    let day_start = snapshot.snapshot_ts.saturating_sub(DAY_MS);
    let largest_24h = weekly
        .iter()
        .filter(|transfer| transfer.ts >= day_start)
        .map(|transfer| transfer.amount_usd)
        .fold(0.0_f64, f64::max);
    let mut amounts: Vec<f64> = weekly.iter().map(|transfer| transfer.amount_usd).collect();
    let median_7d = median(&mut amounts);
    let ratio = if median_7d > 0.0 { largest_24h / median_7d } else { 0.0 };

    let severity = grade(
        ratio >= 4.0 && largest_24h >= 500.0,
        ratio >= 2.5 && largest_24h >= 250.0,
    );

    RiskSignal::new(
        RiskRule::TransferAnomaly,
        severity,
        (ratio / 6.0).min(1.0) * 100.0,
        0.75,
        0.8,
        vec![format!(
            "Largest 24h transfer ${largest_24h:.0} is {ratio:.1}x the 7d median ${median_7d:.0}"
        )],
        metrics([
            ("largest24hUsd", largest_24h),
            ("median7dUsd", median_7d),
            ("ratio", ratio),
            ("transferCount7d", weekly.len() as f64),
        ]),
    )
}

pub fn route_health(snapshot: &PortfolioSnapshot) -> RiskSignal {
    let weekly = weekly_transfers(snapshot);
    if weekly.len() < MIN_TRANSFER_SAMPLE {
        return insufficient(
            RiskRule::RouteHealth,
            format!("Only {} transfers in 7d", weekly.len()),
        );
    }

    let mut per_route: HashMap<&str, usize> = HashMap::new();
    for transfer in &weekly {
        if let Some(route) = transfer.route.as_deref() {
            *per_route.entry(route).or_insert(0) += 1;
        }
    }
    let routed: usize = per_route.values().sum();
    // Ties resolve to the lexicographically smallest route for stable output.
    let dominant = per_route
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(route, count)| (*route, *count));
    // Unrouted transfers still count toward the total.
    let share_pct = match dominant {
        Some((_, count)) => count as f64 / weekly.len() as f64 * 100.0,
        None => 0.0,
    };

    let volume: f64 = weekly.iter().map(|transfer| transfer.amount_usd).sum();
    let fees: f64 = weekly.iter().map(|transfer| transfer.fee_usd).sum();
    let fee_bps = if volume > 0.0 { fees / volume * 10_000.0 } else { 0.0 };

    let severity = grade(
        share_pct >= 80.0 || fee_bps >= 80.0,
        share_pct >= 60.0 || fee_bps >= 45.0,
    );

    let mut evidence = Vec::new();
    if let Some((route, _)) = dominant {
        evidence.push(format!("{route} carries {share_pct:.0}% of 7d transfers"));
    }
    evidence.push(format!("Route fees {fee_bps:.1} bps of 7d volume"));

    RiskSignal::new(
        RiskRule::RouteHealth,
        severity,
        share_pct.max((fee_bps / 100.0).min(1.0) * 100.0),
        0.7,
        if routed == weekly.len() { 0.9 } else { 0.6 },
        evidence,
        metrics([("dominantSharePct", share_pct), ("feeBps", fee_bps)]),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    fn snapshot(context: serde_json::Value) -> PortfolioSnapshot {
        PortfolioSnapshot::from_context(&context, NOW)
    }

    #[test]
    fn single_asset_portfolio_is_critically_concentrated() {
        let signal = concentration(&snapshot(json!({ "holdings": [{ "symbol": "BTC", "valueUsd": 5000 }] })));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.metrics.get("topWeightPct"), Some(&100.0));
        assert_eq!(signal.score, 100.0);
    }

    #[test]
    fn diversified_portfolio_is_info() {
        let holdings: Vec<_> = (0..10).map(|i| json!({ "symbol": format!("T{i}"), "valueUsd": 100 })).collect();
        let signal = concentration(&snapshot(json!({ "holdings": holdings })));
        assert_eq!(signal.severity, Severity::Info);
    }

    #[test]
    fn high_leverage_near_liquidation_is_critical() {
        let signal = leverage_stress(&snapshot(json!({ "positions": [
            { "symbol": "ETH", "side": "long", "size": 1, "leverage": 15, "markPrice": 100, "liquidationPrice": 95 }
        ]})));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.metrics.get("minLiquidationDistancePct"), Some(&5.0));
    }

    #[test]
    fn moderate_leverage_is_warning() {
        let signal = leverage_stress(&snapshot(json!({ "positions": [
            { "symbol": "ETH", "size": 1, "leverage": 7, "markPrice": 100, "liquidationPrice": 60 }
        ]})));
        assert_eq!(signal.severity, Severity::Warning);
    }

    #[test]
    fn uncovered_high_leverage_position_is_critical() {
        let signal = stop_coverage(&snapshot(json!({
            "positions": [
                { "symbol": "BTC", "leverage": 3 },
                { "symbol": "ETH", "leverage": 1 },
                { "symbol": "SOL", "leverage": 1 },
                { "symbol": "ARB", "leverage": 1 }
            ],
            "stopOrders": [{ "symbol": "ETH" }, { "symbol": "SOL" }, { "symbol": "ARB" }]
        })));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.metrics.get("missingPct"), Some(&25.0));
    }

    #[test]
    fn funding_drag_thresholds() {
        let at = |outflow: f64| {
            funding_drag(&snapshot(json!({ "equityUsd": 10_000, "fundingOutflow24hUsd": outflow }))).severity
        };
        assert_eq!(at(10.0), Severity::Info);
        assert_eq!(at(15.0), Severity::Warning);
        assert_eq!(at(40.0), Severity::Critical);
        assert_eq!(funding_drag(&snapshot(json!({}))).severity, Severity::Info);
    }

    #[test]
    fn two_transfers_are_insufficient_regardless_of_size() {
        let signal = transfer_anomaly(&snapshot(json!({ "transfers": [
            { "ts": NOW - 1_000, "amountUsd": 1_000_000 },
            { "ts": NOW - 2 * DAY_MS, "amountUsd": 10 }
        ]})));
        assert_eq!(signal.severity, Severity::Info);
        assert!(signal.coverage < 0.5);
    }

    #[test]
    fn outsized_recent_transfer_is_critical() {
        let signal = transfer_anomaly(&snapshot(json!({ "transfers": [
            { "ts": NOW - 1_000, "amountUsd": 5_000 },
            { "ts": NOW - 2 * DAY_MS, "amountUsd": 400 },
            { "ts": NOW - 3 * DAY_MS, "amountUsd": 500 },
            { "ts": NOW - 4 * DAY_MS, "amountUsd": 600 },
            { "ts": NOW - 30 * DAY_MS, "amountUsd": 90_000 }
        ]})));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.metrics.get("median7dUsd"), Some(&550.0));
    }

    #[test]
    fn dominant_route_is_flagged() {
        let transfers: Vec<_> = (0..5)
            .map(|i: u64| {
                let route = if i == 0 { "cctp" } else { "across" };
                json!({ "ts": NOW - i * DAY_MS, "amountUsd": 1_000, "route": route, "feeUsd": 1 })
            })
            .collect();
        let signal = route_health(&snapshot(json!({ "transfers": transfers })));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.metrics.get("dominantSharePct"), Some(&80.0));
        assert_eq!(signal.metrics.get("feeBps"), Some(&10.0));
    }

    #[test]
    fn route_share_counts_unrouted_transfers() {
        let transfers: Vec<_> = (0..5)
            .map(|i: u64| {
                let mut transfer = json!({ "ts": NOW - i * DAY_MS, "amountUsd": 1_000, "feeUsd": 1 });
                if i == 0 {
                    transfer["route"] = json!("cctp");
                }
                transfer
            })
            .collect();
        let signal = route_health(&snapshot(json!({ "transfers": transfers })));
        assert_eq!(signal.severity, Severity::Info);
        assert_eq!(signal.metrics.get("dominantSharePct"), Some(&20.0));
        assert_eq!(signal.coverage, 0.6);
    }
}
