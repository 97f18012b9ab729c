// =============================================================================
// Order Executor — per-decision state machine against the exchange
// =============================================================================
//
// One decision flows through: leverage (open-like only) → sizing → entry
// (MARKET, or LIMIT with a poll-until-filled window) → protective TP/SL tied
// to the authoritative position size. Reduce/close actions are sized off the
// live position and submitted reduce-only; risk-only actions touch protective
// orders exclusively.
//
// Hard rules enforced here:
//   - quantities are snapped down to stepSize, floored to minQty, and bumped
//     to minNotional for non-reduce-only orders;
//   - protective prices are quantized to tickSize and pushed one tick past
//     the current price when they would trigger immediately (-2021);
//   - a LIMIT entry that does not fill within max_wait_time is cancelled and
//     the decision fails — there is NO fallback to market;
//   - a failed decision never aborts the cycle; the next decision runs.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::binance::{BinanceFuturesClient, OrderAck, OrderRequest, OrderType, SymbolFilters};
use crate::decision::{Decision, EntryType, TradeAction};
use crate::error::{BotError, BotResult};
use crate::types::{OrderSide, PositionSide};

/// Poll cadence while waiting for a LIMIT entry.
const LIMIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of executing (or simulating) one decision. Failures are data, not
/// errors — the scheduler records them and moves on.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub symbol: String,
    pub action: TradeAction,
    pub side: Option<OrderSide>,
    pub success: bool,
    pub dry_run: bool,
    pub order_id: Option<u64>,
    /// Synthetic id for simulated fills.
    pub sim_order_id: Option<String>,
    pub fill_price: Option<f64>,
    pub quantity: Option<f64>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionOutcome {
    fn base(decision: &Decision) -> Self {
        Self {
            symbol: decision.symbol.clone(),
            action: decision.action,
            side: decision.action.order_side(),
            success: false,
            dry_run: false,
            order_id: None,
            sim_order_id: None,
            fill_price: None,
            quantity: None,
            error: None,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    /// One-line digest for the history stream.
    pub fn describe(&self) -> String {
        if self.success {
            format!(
                "{} {} side={} qty={} price={} order_id={}{}",
                self.symbol,
                self.action,
                self.side.map(|s| s.as_str()).unwrap_or("-"),
                self.quantity.map(|q| format!("{q:.6}")).unwrap_or_else(|| "-".into()),
                self.fill_price.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into()),
                self.order_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                if self.dry_run { " [dry-run]" } else { "" },
            )
        } else {
            format!(
                "{} {} FAILED ({}): {}",
                self.symbol,
                self.action,
                self.error_kind.unwrap_or("unknown"),
                self.error.as_deref().unwrap_or("no detail"),
            )
        }
    }
}

/// A resolved entry: what actually filled.
#[derive(Debug, Clone)]
struct Fill {
    order_id: u64,
    price: f64,
    quantity: f64,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Live orders are refused unless this is set in config.
    pub real_trading_enabled: bool,
    /// Simulate fills locally instead of calling the exchange.
    pub dry_run: bool,
    pub min_notional_usdt: f64,
    pub max_wait_time: Duration,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct OrderExecutor {
    client: Arc<BinanceFuturesClient>,
    audit: Arc<AuditLog>,
    settings: ExecutorSettings,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<BinanceFuturesClient>,
        audit: Arc<AuditLog>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { client, audit, settings }
    }

    /// Execute one decision. Never returns an error; failures are folded into
    /// the outcome and alarmed when they touched the live exchange path.
    pub async fn execute(&self, decision: &Decision) -> ExecutionOutcome {
        if self.settings.dry_run {
            return self.simulate(decision);
        }

        let mut outcome = ExecutionOutcome::base(decision);

        if !self.settings.real_trading_enabled {
            outcome.error = Some(
                "real trading is disabled (trading.safety.real_trading_enabled)".into(),
            );
            outcome.error_kind = Some("validation_failed");
            warn!(symbol = %decision.symbol, "live order refused — real trading disabled");
            return outcome;
        }

        let result = match decision.action {
            a if a.is_open_like() => self.execute_open(decision).await,
            a if a.is_reduce_like() => self.execute_reduce(decision).await,
            a if a.is_risk_only() => self.execute_risk_only(decision).await,
            _ => Ok(None), // hold — nothing to do
        };

        match result {
            Ok(Some(fill)) => {
                outcome.success = true;
                outcome.order_id = Some(fill.order_id);
                outcome.fill_price = Some(fill.price);
                outcome.quantity = Some(fill.quantity);
                info!(
                    symbol = %decision.symbol,
                    action = %decision.action,
                    order_id = fill.order_id,
                    price = fill.price,
                    quantity = fill.quantity,
                    "decision executed"
                );
            }
            Ok(None) => {
                outcome.success = true;
                debug!(symbol = %decision.symbol, action = %decision.action, "risk-only action completed");
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                outcome.error_kind = Some(e.kind());
                self.audit.alarm(&format!(
                    "execution failed {} {}: {e}",
                    decision.symbol, decision.action
                ));
            }
        }
        outcome
    }

    // -------------------------------------------------------------------------
    // Dry-run simulation
    // -------------------------------------------------------------------------

    fn simulate(&self, decision: &Decision) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::base(decision);
        outcome.dry_run = true;
        outcome.success = true;
        outcome.sim_order_id = Some(Uuid::new_v4().to_string());
        outcome.fill_price = Some(decision.entry_price.unwrap_or(decision.current_price));
        if decision.action.is_open_like() {
            if let Some(usdt) = decision.usdt_amount {
                if decision.current_price > 0.0 {
                    outcome.quantity =
                        Some(usdt * decision.leverage as f64 / decision.current_price);
                }
            }
        }
        info!(
            symbol = %decision.symbol,
            action = %decision.action,
            usdt = decision.usdt_amount,
            leverage = decision.leverage,
            "dry-run fill simulated"
        );
        outcome
    }

    // -------------------------------------------------------------------------
    // Open / add
    // -------------------------------------------------------------------------

    async fn execute_open(&self, decision: &Decision) -> BotResult<Option<Fill>> {
        let symbol = &decision.symbol;
        let side = decision
            .action
            .order_side()
            .ok_or_else(|| BotError::Internal(format!("{} has no order side", decision.action)))?;

        // 1. Leverage — rejection is non-fatal (some accounts are restricted).
        if let Err(e) = self.client.set_leverage(symbol, decision.leverage).await {
            warn!(symbol = %symbol, leverage = decision.leverage, error = %e,
                  "leverage change rejected — continuing with account default");
        }

        // 2. Sizing off the fresh balance; the committed amount never exceeds
        //    what is actually available.
        let filters = self.client.symbol_filters(symbol).await?;
        let available = self.client.get_account().await?.available_balance;
        let usdt = decision.usdt_amount.ok_or_else(|| {
            BotError::ValidationFailed(format!("{} requires usdt_amount", decision.action))
        })?;
        let usdt = if usdt > available {
            warn!(symbol = %symbol, requested = usdt, available, "usdt_amount clamped to available balance");
            available
        } else {
            usdt
        };

        let quantity = compute_open_quantity(
            usdt,
            decision.leverage,
            decision.current_price,
            &filters,
            self.settings.min_notional_usdt.max(filters.min_notional),
        )?;

        // 3-4. Entry.
        let fill = self.place_entry(decision, side, quantity, false, &filters).await?;

        // 5. Protective orders tied to the authoritative position size. The
        //    entry already filled, so a failure here alarms but does not fail
        //    the decision.
        if let Err(e) = self
            .place_protective(
                symbol,
                side,
                fill.quantity,
                decision.stop_loss_price,
                decision.take_profit_prices.first().copied(),
            )
            .await
        {
            warn!(symbol = %symbol, error = %e, "protective order placement failed");
            self.audit
                .alarm(&format!("protective order placement failed for {symbol}: {e}"));
        }

        Ok(Some(fill))
    }

    // -------------------------------------------------------------------------
    // Reduce / close
    // -------------------------------------------------------------------------

    async fn execute_reduce(&self, decision: &Decision) -> BotResult<Option<Fill>> {
        let symbol = &decision.symbol;
        let side = decision
            .action
            .order_side()
            .ok_or_else(|| BotError::Internal(format!("{} has no order side", decision.action)))?;

        let position = self
            .position_for(symbol)
            .await?
            .ok_or_else(|| BotError::NoPositionToReduce(symbol.clone()))?;

        let filters = self.client.symbol_filters(symbol).await?;
        let quantity = compute_reduce_quantity(
            position.quantity(),
            decision.reduce_percent.or(decision.close_percent),
            decision.reduce_usdt,
            decision.current_price,
            &filters,
        )?;

        let fill = self.place_entry(decision, side, quantity, true, &filters).await?;

        // 7. Post-reduce sweep: a flat symbol must not keep protective orders.
        match self.position_for(symbol).await {
            Ok(None) => {
                info!(symbol = %symbol, "position closed — sweeping protective orders");
                self.cancel_tp_sl_orders(symbol).await;
            }
            Ok(Some(remaining)) => {
                debug!(symbol = %symbol, remaining = remaining.quantity(), "position reduced");
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "post-reduce position check failed"),
        }

        Ok(Some(fill))
    }

    // -------------------------------------------------------------------------
    // Risk-only maintenance
    // -------------------------------------------------------------------------

    async fn execute_risk_only(&self, decision: &Decision) -> BotResult<Option<Fill>> {
        let symbol = &decision.symbol;

        self.cancel_tp_sl_orders(symbol).await;

        if decision.action == TradeAction::AdjustTpSl {
            let position = self
                .position_for(symbol)
                .await?
                .ok_or_else(|| BotError::NoPositionToReduce(symbol.clone()))?;

            let entry_side = match position.side() {
                PositionSide::Long => OrderSide::Buy,
                PositionSide::Short => OrderSide::Sell,
            };

            self.place_protective(
                symbol,
                entry_side,
                position.quantity(),
                decision.stop_loss_price,
                decision.take_profit_prices.first().copied(),
            )
            .await?;
        }

        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Entry placement
    // -------------------------------------------------------------------------

    async fn place_entry(
        &self,
        decision: &Decision,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
        filters: &SymbolFilters,
    ) -> BotResult<Fill> {
        match decision.entry_type {
            EntryType::Market => {
                let ack = self
                    .client
                    .create_order(&OrderRequest {
                        symbol: decision.symbol.clone(),
                        side,
                        order_type: OrderType::Market,
                        quantity,
                        price: None,
                        stop_price: None,
                        time_in_force: None,
                        reduce_only,
                    })
                    .await?;
                Ok(fill_from_ack(&ack, decision.current_price, quantity))
            }
            EntryType::Limit => {
                let entry_price = decision.entry_price.ok_or_else(|| {
                    BotError::ValidationFailed(format!(
                        "LIMIT entry for {} without entry_price",
                        decision.symbol
                    ))
                })?;
                let price = filters.price_nearest(entry_price);

                let ack = self
                    .client
                    .create_order(&OrderRequest {
                        symbol: decision.symbol.clone(),
                        side,
                        order_type: OrderType::Limit,
                        quantity,
                        price: Some(price),
                        stop_price: None,
                        time_in_force: Some("GTC"),
                        reduce_only,
                    })
                    .await?;

                self.await_limit_fill(&decision.symbol, ack.order_id, price, quantity).await
            }
        }
    }

    /// Poll a resting LIMIT order until it fills, dies, or times out. On
    /// timeout the order is cancelled and the decision fails — market
    /// fallback is deliberately not implemented.
    async fn await_limit_fill(
        &self,
        symbol: &str,
        order_id: u64,
        limit_price: f64,
        quantity: f64,
    ) -> BotResult<Fill> {
        let deadline = tokio::time::Instant::now() + self.settings.max_wait_time;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(LIMIT_POLL_INTERVAL).await;

            let order = self.client.get_order(symbol, order_id).await?;
            if order.status == "FILLED" {
                return Ok(Fill {
                    order_id,
                    price: if order.avg_price > 0.0 { order.avg_price } else { limit_price },
                    quantity: if order.executed_qty > 0.0 { order.executed_qty } else { quantity },
                });
            }
            if order.is_terminal() {
                // CANCELED / REJECTED / EXPIRED
                return Err(BotError::OrderNotFilled(format!(
                    "LIMIT order {order_id} for {symbol} ended as {}",
                    order.status
                )));
            }
            debug!(symbol, order_id, status = %order.status, "LIMIT order still resting");
        }

        if let Err(e) = self.client.cancel_order(symbol, order_id).await {
            warn!(symbol, order_id, error = %e, "failed to cancel timed-out LIMIT order");
        }
        Err(BotError::OrderNotFilled(format!(
            "LIMIT order {order_id} for {symbol} unfilled after {}s — cancelled",
            self.settings.max_wait_time.as_secs()
        )))
    }

    // -------------------------------------------------------------------------
    // Protective orders
    // -------------------------------------------------------------------------

    /// Cancel existing TP/SL, read the authoritative position size, and place
    /// fresh STOP_MARKET / TAKE_PROFIT_MARKET reduce-only orders.
    async fn place_protective(
        &self,
        symbol: &str,
        entry_side: OrderSide,
        fallback_qty: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> BotResult<()> {
        if stop_loss.is_none() && take_profit.is_none() {
            return Ok(());
        }

        self.cancel_tp_sl_orders(symbol).await;

        // Authoritative size handles partial fills and adds to an existing
        // position.
        let quantity = match self.position_for(symbol).await {
            Ok(Some(pos)) => pos.quantity(),
            _ => fallback_qty,
        };
        if quantity <= 0.0 {
            return Err(BotError::ValidationFailed(format!(
                "no position quantity to protect for {symbol}"
            )));
        }

        let filters = self.client.symbol_filters(symbol).await?;
        let last = match self.client.get_ticker(symbol).await {
            Ok(t) if t.last_price > 0.0 => t.last_price,
            _ => 0.0,
        };

        let plan = protective_prices(entry_side, last, &filters, stop_loss, take_profit);
        for adjustment in &plan.adjustments {
            info!(symbol, "{adjustment}");
        }

        let protective_side = entry_side.opposite();

        if let Some(stop) = plan.stop_loss {
            let ack = self
                .client
                .create_order(&OrderRequest {
                    symbol: symbol.to_string(),
                    side: protective_side,
                    order_type: OrderType::StopMarket,
                    quantity,
                    price: None,
                    stop_price: Some(stop),
                    time_in_force: Some("GTC"),
                    reduce_only: true,
                })
                .await?;
            info!(symbol, stop_price = stop, order_id = ack.order_id, "stop-loss placed");
        }

        if let Some(tp) = plan.take_profit {
            let ack = self
                .client
                .create_order(&OrderRequest {
                    symbol: symbol.to_string(),
                    side: protective_side,
                    order_type: OrderType::TakeProfitMarket,
                    quantity,
                    price: None,
                    stop_price: Some(tp),
                    time_in_force: Some("GTC"),
                    reduce_only: true,
                })
                .await?;
            info!(symbol, take_profit = tp, order_id = ack.order_id, "take-profit placed");
        }

        Ok(())
    }

    /// Cancel every STOP_MARKET / TAKE_PROFIT_MARKET on `symbol`. Individual
    /// cancel failures are logged and skipped.
    pub async fn cancel_tp_sl_orders(&self, symbol: &str) {
        let orders = match self.client.get_open_orders(Some(symbol)).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol, error = %e, "could not list open orders for TP/SL cancel");
                return;
            }
        };

        for order in orders.iter().filter(|o| o.is_protective()) {
            match self.client.cancel_order(symbol, order.order_id).await {
                Ok(()) => info!(symbol, order_id = order.order_id, order_type = %order.order_type,
                                "protective order cancelled"),
                Err(e) => warn!(symbol, order_id = order.order_id, error = %e,
                                "failed to cancel protective order"),
            }
        }
    }

    async fn position_for(&self, symbol: &str) -> BotResult<Option<crate::types::PositionInfo>> {
        let positions = self.client.get_positions().await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.position_amount != 0.0))
    }
}

fn fill_from_ack(ack: &OrderAck, fallback_price: f64, fallback_qty: f64) -> Fill {
    Fill {
        order_id: ack.order_id,
        price: if ack.avg_price > 0.0 { ack.avg_price } else { fallback_price },
        quantity: if ack.executed_qty > 0.0 { ack.executed_qty } else { fallback_qty },
    }
}

// =============================================================================
// Pure sizing / pricing helpers
// =============================================================================

/// Open/add quantity: `usdt · leverage / last`, snapped down to the step
/// grid, floored to `min_qty`, and bumped up to the minimum notional.
pub fn compute_open_quantity(
    usdt: f64,
    leverage: u32,
    last: f64,
    filters: &SymbolFilters,
    min_notional: f64,
) -> BotResult<f64> {
    if usdt <= 0.0 {
        return Err(BotError::ValidationFailed("usdt_amount must be positive".into()));
    }
    if last <= 0.0 {
        return Err(BotError::ValidationFailed("no valid price for sizing".into()));
    }

    let mut quantity = filters.snap_qty_down(usdt * leverage as f64 / last);

    if quantity < filters.min_qty {
        quantity = filters.min_qty;
    }

    if quantity * last < min_notional {
        quantity = filters.snap_qty_up(min_notional / last);
    }

    if quantity <= 0.0 {
        return Err(BotError::ValidationFailed(format!(
            "computed open quantity is zero (usdt={usdt}, last={last})"
        )));
    }
    Ok(quantity)
}

/// Reduce/close quantity from the live position size and whichever sizing
/// field the model supplied. Defaults to the full position, never exceeds it.
pub fn compute_reduce_quantity(
    position_qty: f64,
    percent: Option<f64>,
    reduce_usdt: Option<f64>,
    last: f64,
    filters: &SymbolFilters,
) -> BotResult<f64> {
    if position_qty <= 0.0 {
        return Err(BotError::ValidationFailed("position quantity is zero".into()));
    }

    let mut quantity = if let Some(pct) = percent {
        position_qty * pct.clamp(0.0, 100.0) / 100.0
    } else if let Some(usdt) = reduce_usdt {
        if last <= 0.0 {
            return Err(BotError::ValidationFailed("no valid price for reduce_usdt sizing".into()));
        }
        usdt / last
    } else {
        position_qty
    };

    if quantity > position_qty {
        quantity = position_qty;
    }
    quantity = filters.snap_qty_down(quantity);

    if quantity <= 0.0 {
        return Err(BotError::ValidationFailed("computed reduce quantity is zero".into()));
    }
    Ok(quantity)
}

/// Final protective price plan for a position entered with `entry_side`.
#[derive(Debug, Clone, Default)]
pub struct ProtectivePlan {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Human-readable notes for every price that had to move.
    pub adjustments: Vec<String>,
}

/// Enforce the directional rule against the current price and quantize:
/// levels that must sit *below* the price round down, levels that must sit
/// *above* it round up. A level that would trigger immediately is shifted by
/// exactly one tick past the price.
pub fn protective_prices(
    entry_side: OrderSide,
    last: f64,
    filters: &SymbolFilters,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> ProtectivePlan {
    let mut plan = ProtectivePlan::default();
    let tick = filters.tick_size;

    let mut adjust = |name: &str, requested: f64, target: f64| {
        if (target - requested).abs() > f64::EPSILON {
            plan.adjustments.push(format!(
                "{name} adjusted {requested} -> {target} to avoid immediate trigger"
            ));
        }
        target
    };

    match entry_side {
        OrderSide::Buy => {
            // Long: SL strictly below last, TP strictly above.
            if let Some(sl) = stop_loss {
                let target = if last > 0.0 { sl.min(last - tick) } else { sl };
                plan.stop_loss = Some(filters.price_down(adjust("stop_loss", sl, target)));
            }
            if let Some(tp) = take_profit {
                let target = if last > 0.0 { tp.max(last + tick) } else { tp };
                plan.take_profit = Some(filters.price_up(adjust("take_profit", tp, target)));
            }
        }
        OrderSide::Sell => {
            // Short: SL strictly above last, TP strictly below.
            if let Some(sl) = stop_loss {
                let target = if last > 0.0 { sl.max(last + tick) } else { sl };
                plan.stop_loss = Some(filters.price_up(adjust("stop_loss", sl, target)));
            }
            if let Some(tp) = take_profit {
                let target = if last > 0.0 { tp.min(last - tick) } else { tp };
                plan.take_profit = Some(filters.price_down(adjust("take_profit", tp, target)));
            }
        }
    }

    plan
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn btc_filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "BTCUSDT".into(),
            tick_size: 0.1,
            step_size: 0.001,
            min_qty: 0.001,
            min_notional: 5.0,
            price_precision: 1,
            quantity_precision: 3,
        }
    }

    // ---- open sizing --------------------------------------------------------

    #[test]
    fn open_quantity_snaps_down() {
        // 100 USDT * 5x / 30000 = 0.016666... -> 0.016
        let qty = compute_open_quantity(100.0, 5, 30000.0, &btc_filters(), 5.0).unwrap();
        assert!((qty - 0.016).abs() < 1e-12);
    }

    #[test]
    fn open_quantity_floors_to_min_qty() {
        // 1 USDT * 1x / 30000 is below min_qty
        let qty = compute_open_quantity(1.0, 1, 30000.0, &btc_filters(), 5.0).unwrap();
        assert!((qty - 0.001).abs() < 1e-12);
    }

    #[test]
    fn open_quantity_bumps_to_min_notional() {
        let mut filters = btc_filters();
        filters.min_qty = 0.0001;
        filters.step_size = 0.0001;
        filters.quantity_precision = 4;
        // 0.5 USDT * 2x / 100 = 0.01 -> notional 1.0 < 5.0 -> bump to 5/100 = 0.05
        let qty = compute_open_quantity(0.5, 2, 100.0, &filters, 5.0).unwrap();
        assert!((qty - 0.05).abs() < 1e-12);
        assert!(qty * 100.0 >= 5.0);
    }

    #[test]
    fn open_quantity_rejects_bad_inputs() {
        assert!(compute_open_quantity(0.0, 5, 30000.0, &btc_filters(), 5.0).is_err());
        assert!(compute_open_quantity(100.0, 5, 0.0, &btc_filters(), 5.0).is_err());
    }

    // ---- reduce sizing ------------------------------------------------------

    #[test]
    fn reduce_by_percent() {
        // +0.040 position, close 50% -> 0.020
        let qty =
            compute_reduce_quantity(0.040, Some(50.0), None, 30000.0, &btc_filters()).unwrap();
        assert!((qty - 0.020).abs() < 1e-12);
    }

    #[test]
    fn reduce_by_usdt_capped_at_position() {
        // 3000 USDT notional at 30000 = 0.1, but position is only 0.05
        let qty =
            compute_reduce_quantity(0.05, None, Some(3000.0), 30000.0, &btc_filters()).unwrap();
        assert!((qty - 0.05).abs() < 1e-12);
    }

    #[test]
    fn reduce_defaults_to_full_position() {
        let qty = compute_reduce_quantity(0.032, None, None, 30000.0, &btc_filters()).unwrap();
        assert!((qty - 0.032).abs() < 1e-12);
    }

    #[test]
    fn reduce_with_no_position_is_rejected() {
        assert!(compute_reduce_quantity(0.0, Some(50.0), None, 30000.0, &btc_filters()).is_err());
    }

    #[test]
    fn tiny_reduce_snaps_to_zero_and_fails() {
        // 0.01% of 0.002 snaps below one step
        assert!(
            compute_reduce_quantity(0.002, Some(0.01), None, 30000.0, &btc_filters()).is_err()
        );
    }

    // ---- protective prices --------------------------------------------------

    #[test]
    fn long_protective_prices_pass_through_when_safe() {
        let plan = protective_prices(
            OrderSide::Buy,
            30000.0,
            &btc_filters(),
            Some(29700.0),
            Some(30600.0),
        );
        assert_eq!(plan.stop_loss, Some(29700.0));
        assert_eq!(plan.take_profit, Some(30600.0));
        assert!(plan.adjustments.is_empty());
    }

    #[test]
    fn long_stop_above_last_is_shifted_one_tick_below() {
        // would trigger immediately (-2021): SL 30010 vs last 30000
        let plan =
            protective_prices(OrderSide::Buy, 30000.0, &btc_filters(), Some(30010.0), None);
        assert!((plan.stop_loss.unwrap() - 29999.9).abs() < 1e-9);
        assert_eq!(plan.adjustments.len(), 1);
        assert!(plan.adjustments[0].contains("stop_loss"));
    }

    #[test]
    fn long_take_profit_below_last_is_shifted_one_tick_above() {
        let plan =
            protective_prices(OrderSide::Buy, 30000.0, &btc_filters(), None, Some(29950.0));
        assert!((plan.take_profit.unwrap() - 30000.1).abs() < 1e-9);
        assert_eq!(plan.adjustments.len(), 1);
    }

    #[test]
    fn short_protective_prices_mirror() {
        let plan = protective_prices(
            OrderSide::Sell,
            30000.0,
            &btc_filters(),
            Some(30300.0),
            Some(29400.0),
        );
        assert_eq!(plan.stop_loss, Some(30300.0));
        assert_eq!(plan.take_profit, Some(29400.0));

        // short SL below last must be pushed one tick above
        let plan =
            protective_prices(OrderSide::Sell, 30000.0, &btc_filters(), Some(29990.0), None);
        assert!((plan.stop_loss.unwrap() - 30000.1).abs() < 1e-9);
    }

    #[test]
    fn protective_prices_are_on_the_tick_grid() {
        let plan = protective_prices(
            OrderSide::Buy,
            30000.0,
            &btc_filters(),
            Some(29700.07),
            Some(30600.04),
        );
        // below-last level rounds down, above-last level rounds up
        assert!((plan.stop_loss.unwrap() - 29700.0).abs() < 1e-9);
        assert!((plan.take_profit.unwrap() - 30600.1).abs() < 1e-9);
    }

    #[test]
    fn missing_levels_stay_missing() {
        let plan = protective_prices(OrderSide::Buy, 30000.0, &btc_filters(), None, None);
        assert!(plan.stop_loss.is_none());
        assert!(plan.take_profit.is_none());
    }
}
