// =============================================================================
// Reconciliation — orphan protective-order sweep against the exchange
// =============================================================================
//
// When a stop-loss or take-profit fires between cycles, the position closes
// but the counterpart order keeps resting. The sweep runs at the end of every
// cycle (and after any reduce/close that zeroes a symbol):
//
//   1. List all open orders across symbols.
//   2. Build the set of symbols with a non-zero position.
//   3. Cancel every STOP_MARKET / TAKE_PROFIT_MARKET on a symbol outside
//      that set.
//
// Positions and orders are always read fresh from the exchange; the internal
// positions map is never trusted for this.
// =============================================================================

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::binance::BinanceFuturesClient;
use crate::error::BotResult;
use crate::types::{OrderInfo, PositionInfo};

/// Summary of a single sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    /// Orphan protective orders found.
    pub orphans_found: u32,
    /// Orphans successfully cancelled.
    pub orphans_cancelled: u32,
    /// ISO-8601 timestamp of this sweep.
    pub timestamp: String,
}

/// Pure planning step: which (symbol, order_id) pairs must be cancelled.
/// Separated from I/O so the no-orphan invariant is directly testable.
pub fn plan_orphan_cancels(
    open_orders: &[OrderInfo],
    positions: &[PositionInfo],
) -> Vec<(String, u64)> {
    let active_symbols: HashSet<&str> = positions
        .iter()
        .filter(|p| p.position_amount != 0.0)
        .map(|p| p.symbol.as_str())
        .collect();

    open_orders
        .iter()
        .filter(|o| o.is_protective() && !active_symbols.contains(o.symbol.as_str()))
        .map(|o| (o.symbol.clone(), o.order_id))
        .collect()
}

/// Run one sweep. Individual cancel failures are logged and counted, never
/// fatal; listing failures propagate so the scheduler can record them.
pub async fn sweep_orphan_protections(client: &BinanceFuturesClient) -> BotResult<SweepResult> {
    let now = Utc::now().to_rfc3339();

    let positions = client.get_positions().await?;
    let open_orders = client.get_open_orders(None).await?;

    let plan = plan_orphan_cancels(&open_orders, &positions);
    debug!(
        open_orders = open_orders.len(),
        active_positions = positions.len(),
        orphans = plan.len(),
        "orphan sweep planned"
    );

    let mut cancelled = 0u32;
    for (symbol, order_id) in &plan {
        match client.cancel_order(symbol, *order_id).await {
            Ok(()) => {
                cancelled += 1;
                info!(symbol = %symbol, order_id, "orphan protective order cancelled");
            }
            Err(e) => {
                warn!(symbol = %symbol, order_id, error = %e, "failed to cancel orphan order");
            }
        }
    }

    let result = SweepResult {
        orphans_found: plan.len() as u32,
        orphans_cancelled: cancelled,
        timestamp: now,
    };

    if result.orphans_found > 0 {
        info!(
            found = result.orphans_found,
            cancelled = result.orphans_cancelled,
            "orphan sweep completed"
        );
    }
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, amount: f64) -> PositionInfo {
        PositionInfo {
            symbol: symbol.into(),
            position_amount: amount,
            entry_price: 30000.0,
            mark_price: 30000.0,
            unrealized_pnl: 0.0,
            leverage: 5,
            isolated: false,
        }
    }

    fn order(symbol: &str, order_type: &str, id: u64) -> OrderInfo {
        OrderInfo {
            order_id: id,
            symbol: symbol.into(),
            status: "NEW".into(),
            side: "SELL".into(),
            order_type: order_type.into(),
            time_in_force: "GTC".into(),
            orig_qty: 0.02,
            executed_qty: 0.0,
            price: 0.0,
            stop_price: 29500.0,
            avg_price: 0.0,
            reduce_only: true,
        }
    }

    #[test]
    fn protections_on_flat_symbols_are_orphans() {
        // BTC position was closed by its SL between cycles; the TP remains.
        let orders = vec![
            order("BTCUSDT", "TAKE_PROFIT_MARKET", 11),
            order("BTCUSDT", "STOP_MARKET", 12),
        ];
        let positions = vec![position("ETHUSDT", 1.0)];

        let plan = plan_orphan_cancels(&orders, &positions);
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(&("BTCUSDT".to_string(), 11)));
        assert!(plan.contains(&("BTCUSDT".to_string(), 12)));
    }

    #[test]
    fn protections_on_live_symbols_are_kept() {
        let orders = vec![
            order("BTCUSDT", "STOP_MARKET", 1),
            order("BTCUSDT", "TAKE_PROFIT_MARKET", 2),
        ];
        let positions = vec![position("BTCUSDT", 0.02)];
        assert!(plan_orphan_cancels(&orders, &positions).is_empty());
    }

    #[test]
    fn non_protective_orders_are_never_touched() {
        // a resting LIMIT entry on a flat symbol must survive the sweep
        let orders = vec![order("BTCUSDT", "LIMIT", 5)];
        let positions = vec![];
        assert!(plan_orphan_cancels(&orders, &positions).is_empty());
    }

    #[test]
    fn zero_amount_positions_count_as_flat() {
        let orders = vec![order("BTCUSDT", "STOP_MARKET", 7)];
        let positions = vec![position("BTCUSDT", 0.0)];
        let plan = plan_orphan_cancels(&orders, &positions);
        assert_eq!(plan, vec![("BTCUSDT".to_string(), 7)]);
    }

    #[test]
    fn short_positions_protect_their_orders() {
        let orders = vec![order("ETHUSDT", "STOP_MARKET", 9)];
        let positions = vec![position("ETHUSDT", -2.5)];
        assert!(plan_orphan_cancels(&orders, &positions).is_empty());
    }
}
