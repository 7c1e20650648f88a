// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Defensive extraction of portfolio state from a request context.
//!
//! Every reader here is total: unknown shapes, non-finite numbers and missing
//! fields are skipped, never reported.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{as_finite, first_finite, first_text, lookup, resolve_snapshot_ts};

const HOLDING_LISTS: &[&str] = &["holdings", "balances", "portfolio.holdings"];
const SYMBOL_KEYS: &[&str] = &["symbol", "asset", "coin"];
const VALUE_KEYS: &[&str] = &["valueUsd", "value_usd", "usdValue", "value"];

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// One spot holding valued in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub value_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

/// An open derivatives position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub leverage: f64,
    pub mark_price: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub notional_usd: f64,
    /// A stop-loss is attached directly to the position.
    pub has_stop: bool,
}

impl Position {
    /// Percentage move against the position that reaches liquidation.
    ///
    /// Longs liquidate below mark, shorts above.  A liquidation price already
    /// crossed reads as zero distance.
    pub fn liquidation_distance_pct(&self) -> Option<f64> {
        let mark = self.mark_price.filter(|mark| *mark > 0.0)?;
        let liquidation = self.liquidation_price.filter(|price| *price > 0.0)?;
        let distance = match self.side {
            Side::Long => (mark - liquidation) / mark,
            Side::Short => (liquidation - mark) / mark,
        };
        Some((distance * 100.0).max(0.0))
    }
}

/// A cross-venue or cross-chain transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub ts: u64,
    pub amount_usd: f64,
    pub route: Option<String>,
    pub fee_usd: f64,
}

/// Normalised portfolio state consumed by the risk rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub holdings: Vec<Holding>,
    pub positions: Vec<Position>,
    /// Upper-cased symbols that carry a standalone stop order.
    pub stop_symbols: Vec<String>,
    /// Funding paid (not received) over the 24h before the snapshot.
    pub funding_outflow_24h_usd: Option<f64>,
    pub equity_usd: Option<f64>,
    pub transfers: Vec<Transfer>,
    pub snapshot_ts: u64,
}

impl PortfolioSnapshot {
    /// Read a snapshot out of an arbitrary context tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insight_governance_core::risk::PortfolioSnapshot;
    ///
    /// let context = serde_json::json!({
    ///     "snapshotTs": 1_000,
    ///     "holdings": [{ "symbol": "BTC", "valueUsd": "2500" }, { "coin": "ETH", "value": 1500 }],
    /// });
    /// let snapshot = PortfolioSnapshot::from_context(&context, 5_000);
    /// assert_eq!(snapshot.holdings.len(), 2);
    /// assert_eq!(snapshot.snapshot_ts, 1_000);
    /// ```
    pub fn from_context(context: &Value, now_ms: u64) -> Self {
        let snapshot_ts = resolve_snapshot_ts(context, now_ms);
        let positions = parse_positions(context);
        let mut holdings = parse_holdings(context);
        if holdings.is_empty() {
            holdings = positions
                .iter()
                .filter(|position| position.notional_usd > 0.0)
                .map(|position| Holding {
                    symbol: position.symbol.clone(),
                    value_usd: position.notional_usd,
                })
                .collect();
        }

        let equity_usd = first_finite(
            context,
            &["equityUsd", "equity_usd", "equity", "accountValue", "totalValueUsd"],
        )
        .filter(|equity| *equity > 0.0)
        .or_else(|| {
            let total: f64 = holdings.iter().map(|holding| holding.value_usd).sum();
            (total > 0.0).then_some(total)
        });

        Self {
            holdings,
            positions,
            stop_symbols: parse_stop_symbols(context),
            funding_outflow_24h_usd: parse_funding_outflow(context, snapshot_ts),
            equity_usd,
            transfers: parse_transfers(context, snapshot_ts),
            snapshot_ts,
        }
    }

    /// Whether `position` is protected by a stop, either inline or through a
    /// standalone stop order on the same symbol.
    pub fn is_stop_covered(&self, position: &Position) -> bool {
        position.has_stop
            || self
                .stop_symbols
                .iter()
                .any(|symbol| symbol.eq_ignore_ascii_case(&position.symbol))
    }
}

fn array_at<'a>(context: &'a Value, paths: &[&str]) -> &'a [Value] {
    paths
        .iter()
        .filter_map(|path| lookup(context, path))
        .find_map(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Holdings with a symbol and a positive finite USD value.
pub(crate) fn parse_holdings(context: &Value) -> Vec<Holding> {
    array_at(context, HOLDING_LISTS)
        .iter()
        .filter_map(|node| {
            let symbol = first_text(node, SYMBOL_KEYS)?;
            let value_usd = first_finite(node, VALUE_KEYS)?.abs();
            (value_usd > 0.0).then_some(Holding { symbol, value_usd })
        })
        .collect()
}

fn parse_side(node: &Value, size: Option<f64>) -> Side {
    match first_text(node, &["side", "direction"]).map(|side| side.to_ascii_lowercase()) {
        Some(side) if side == "short" || side == "sell" || side == "s" => Side::Short,
        Some(_) => Side::Long,
        None if size.is_some_and(|size| size < 0.0) => Side::Short,
        None => Side::Long,
    }
}

fn parse_positions(context: &Value) -> Vec<Position> {
    array_at(context, &["positions", "portfolio.positions"])
        .iter()
        .filter_map(|node| {
            let symbol = first_text(node, SYMBOL_KEYS)?;
            let size = first_finite(node, &["size", "szi", "quantity"]);
            if size == Some(0.0) {
                return None;
            }
            let mark_price = first_finite(node, &["markPrice", "mark_price", "mark", "markPx"]);
            let notional_usd = first_finite(node, &["notionalUsd", "notional_usd", "positionValue"])
                .or_else(|| Some(size? * mark_price?))
                .map_or(0.0, f64::abs);
            let has_stop = first_finite(node, &["stopLoss", "stopPrice", "stop_loss"])
                .is_some_and(|stop| stop > 0.0)
                || lookup(node, "hasStop").and_then(Value::as_bool).unwrap_or(false);

            Some(Position {
                side: parse_side(node, size),
                leverage: first_finite(node, &["leverage", "lev"])
                    .filter(|leverage| *leverage > 0.0)
                    .unwrap_or(1.0),
                mark_price,
                liquidation_price: first_finite(
                    node,
                    &["liquidationPrice", "liquidation_price", "liqPrice", "liquidationPx"],
                ),
                notional_usd,
                has_stop,
                symbol,
            })
        })
        .collect()
}

fn parse_stop_symbols(context: &Value) -> Vec<String> {
    array_at(context, &["stopOrders", "stop_orders", "stops"])
        .iter()
        .filter_map(|node| first_text(node, SYMBOL_KEYS))
        .map(|symbol| symbol.to_ascii_uppercase())
        .collect()
}

/// Funding paid over the day before `snapshot_ts`.
///
/// A scalar outflow field wins.  A signed net figure counts only when
/// negative.  Otherwise individual payments are summed, where negative
/// amounts are payments made.
fn parse_funding_outflow(context: &Value, snapshot_ts: u64) -> Option<f64> {
    if let Some(outflow) = first_finite(context, &["fundingOutflow24hUsd", "funding_outflow_24h_usd"]) {
        return Some(outflow.abs());
    }
    if let Some(net) = first_finite(context, &["funding24hUsd", "funding_24h_usd"]) {
        return Some((-net).max(0.0));
    }

    let payments = array_at(context, &["fundingPayments", "funding_payments", "funding"]);
    if payments.is_empty() {
        return None;
    }
    let since = snapshot_ts.saturating_sub(DAY_MS);
    let outflow = payments
        .iter()
        .filter(|node| {
            read_ts(node).map_or(true, |ts| ts >= since && ts <= snapshot_ts)
        })
        .filter_map(|node| first_finite(node, &["amountUsd", "amount_usd", "usdc", "amount"]))
        .filter(|amount| *amount < 0.0)
        .map(f64::abs)
        .sum();
    Some(outflow)
}

fn read_ts(node: &Value) -> Option<u64> {
    first_finite(node, &["ts", "timestamp", "time"])
        .filter(|ts| *ts > 0.0)
        .map(|ts| ts as u64)
}

/// Transfers with a positive amount.  A missing timestamp is read as the
/// snapshot time.
fn parse_transfers(context: &Value, snapshot_ts: u64) -> Vec<Transfer> {
    array_at(context, &["transfers", "portfolio.transfers"])
        .iter()
        .filter_map(|node| {
            let amount_usd = first_finite(node, &["amountUsd", "amount_usd", "valueUsd", "amount"])?.abs();
            if amount_usd <= 0.0 {
                return None;
            }
            Some(Transfer {
                ts: read_ts(node).unwrap_or(snapshot_ts),
                amount_usd,
                route: first_text(node, &["route", "routeId", "bridge"]),
                fee_usd: lookup(node, "feeUsd")
                    .or_else(|| lookup(node, "fee_usd"))
                    .or_else(|| lookup(node, "fee"))
                    .and_then(as_finite)
                    .map_or(0.0, f64::abs),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
