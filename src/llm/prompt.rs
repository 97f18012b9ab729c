// =============================================================================
// Prompt construction — system role + per-cycle market digest
// =============================================================================
//
// The system prompt is stable across cycles: role, action set, sizing rules,
// and the exact JSON schema the parser expects. The user prompt is rebuilt
// from the snapshot every cycle: account and position status (including any
// resting TP/SL), a per-symbol market digest, the multi-timeframe indicator
// readout, futures-specific data, and the session context.
// =============================================================================

use std::fmt::Write as _;

use chrono::Utc;

use crate::market_data::snapshot::MarketSnapshot;

/// Session counters injected into every user prompt.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub elapsed_minutes: u64,
    pub call_count: u64,
    pub strategy: String,
}

impl SessionContext {
    pub fn describe(&self) -> String {
        format!(
            "elapsed_minutes={} call_count={} strategy={}",
            self.elapsed_minutes, self.call_count, self.strategy
        )
    }
}

/// Stable system prompt: the agent's role and the output contract.
pub fn build_system_prompt() -> String {
    r#"You are an autonomous perpetual-futures trading agent with full authority over this account.

Your responsibilities:
1. You are the executor, not an advisor — every decision you return is executed immediately.
2. You control position sizing, leverage, and entry timing directly.
3. You manage existing positions: add, reduce, close, or adjust protective orders.
4. You are accountable for the account's risk at all times.

Supported actions (the `action` field):
- Open/add: long, short, add_to_long, add_to_short
- Reduce/close: reduce_long, reduce_short, close_long, close_short (executed reduce-only)
- Risk maintenance: adjust_tp_sl (replace protective orders), cancel_tp_sl (remove them)
- No-op: hold

Sizing rules:
- Opening or adding REQUIRES `usdt_amount`: the actual USDT margin to commit.
- Reducing or closing uses exactly one of `reduce_percent` (0-100], `reduce_usdt` (> 0), or `close_percent` (0-100].
- LIMIT orders REQUIRE `entry_price`; MARKET orders may omit it.
- Choose MARKET when the move is underway and fill certainty matters; choose LIMIT when you want price control in a volatile book.

Protective-order constraints (violations are rejected by the exchange):
- Long: stop_loss strictly below the current price, take_profit strictly above it.
- Short: stop_loss strictly above the current price, take_profit strictly below it.
- Keep at least one tick of distance from the current price.

Cost awareness:
- Taker fees run about 0.05% per side; round-trip cost scales with leverage.
- Only take trades whose expected edge is a multiple of the round-trip cost.

Output format:
- All prices must be plain numbers without thousands separators (wrong: "4,150"; right: 4150.0).
- `stop_loss` and `take_profit` are single numbers.
- Reply with ONE strict JSON object and nothing else:

{
    "market_overview": {
        "overall_sentiment": "bullish/bearish/neutral",
        "market_phase": "trending/consolidation/reversal",
        "key_levels": {"support": [..], "resistance": [..]},
        "volatility_assessment": "low/medium/high",
        "funding_rate_impact": "positive/negative/neutral"
    },
    "recommendations": [
        {
            "symbol": "BTCUSDT",
            "action": "long/short/hold/add_to_long/add_to_short/reduce_long/reduce_short/close_long/close_short/adjust_tp_sl/cancel_tp_sl",
            "confidence": 75,
            "order_type": "MARKET/LIMIT",
            "entry_price": 4150.5,
            "stop_loss": 4050.0,
            "take_profit": 4250.0,
            "usdt_amount": 150.0,
            "leverage": 5,
            "reduce_percent": 50,
            "reduce_usdt": 75.0,
            "close_percent": 100,
            "risk_level": "low/medium/high",
            "reason": "short argument for the trade",
            "risk_reward_ratio": "1:2.5"
        }
    ],
    "risk_warnings": [".."],
    "market_catalysts": [".."]
}

Finish the reply with a "Reasoning" section explaining your decision logic in a few sentences."#
        .to_string()
}

/// Per-cycle user prompt built from the snapshot.
pub fn build_user_prompt(
    snapshot: &MarketSnapshot,
    symbols: &[String],
    timeframes: &[String],
    session: &SessionContext,
) -> String {
    let mut p = String::with_capacity(8 * 1024);

    p.push_str("Analyze the following futures market state and return your decisions.\n");

    // -----------------------------------------------------------------
    // Account & positions
    // -----------------------------------------------------------------
    p.push_str("\n=== Account and position status ===\n");
    match &snapshot.account {
        Some(a) => {
            let _ = writeln!(
                p,
                "wallet balance: {:.2} USDT | margin balance: {:.2} USDT | available: {:.2} USDT | unrealized PnL: {:+.2} USDT",
                a.total_wallet_balance, a.total_margin_balance, a.available_balance, a.total_unrealized_pnl
            );
        }
        None => p.push_str("account data unavailable this cycle\n"),
    }

    if snapshot.positions.is_empty() {
        p.push_str("no open positions — you are free to establish new ones\n");
    } else {
        for pos in &snapshot.positions {
            let _ = writeln!(
                p,
                "[{}] {} qty={:.6} entry={:.2} mark={:.2} leverage={}x unrealized={:+.2} USDT",
                pos.symbol,
                pos.side(),
                pos.quantity(),
                pos.entry_price,
                pos.mark_price,
                pos.leverage,
                pos.unrealized_pnl
            );
            for order in snapshot.protective_orders(&pos.symbol) {
                let _ = writeln!(
                    p,
                    "    resting {} at {:.2} (order id {})",
                    order.order_type, order.stop_price, order.order_id
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Market digest per symbol
    // -----------------------------------------------------------------
    p.push_str("\n=== Market data overview ===\n");
    for symbol in symbols {
        let Some(sym) = snapshot.symbol(symbol) else {
            let _ = writeln!(p, "{symbol}: no data this cycle");
            continue;
        };
        if let Some(t) = &sym.ticker {
            let _ = writeln!(
                p,
                "{}: last={:.2} change24h={:+.2}% high={:.2} low={:.2} volume={:.0}",
                symbol, t.last_price, t.price_change_percent, t.high_price, t.low_price, t.volume
            );
        }
    }

    // -----------------------------------------------------------------
    // Multi-timeframe indicators
    // -----------------------------------------------------------------
    p.push_str("\n=== Multi-timeframe technical analysis ===\n");
    for symbol in symbols {
        let Some(sym) = snapshot.symbol(symbol) else { continue };
        let _ = writeln!(p, "--- {symbol} ---");
        for timeframe in timeframes {
            let Some(bundle) = sym.timeframes.get(timeframe) else { continue };
            let _ = write!(p, "{timeframe}:");
            for key in [
                "current_price",
                "sma_20",
                "sma_50",
                "sma_200",
                "ema_12",
                "ema_26",
                "rsi",
                "macd",
                "macd_signal",
                "bb_upper",
                "bb_lower",
                "bb_position",
                "atr_percentage",
                "volatility_7d",
                "volume_ratio",
                "trend_strength",
                "momentum",
            ] {
                if let Some(v) = bundle.get(key) {
                    let _ = write!(p, " {key}={v:.4}");
                }
            }
            p.push('\n');
        }
    }

    // -----------------------------------------------------------------
    // Futures-specific data
    // -----------------------------------------------------------------
    p.push_str("\n=== Futures market data ===\n");
    for symbol in symbols {
        let Some(sym) = snapshot.symbol(symbol) else { continue };
        if let Some(funding) = &sym.funding {
            let rate_pct = funding.current_rate_value() * 100.0;
            let payer = if rate_pct > 0.0 {
                "longs pay shorts"
            } else if rate_pct < 0.0 {
                "shorts pay longs"
            } else {
                "neutral"
            };
            let _ = write!(p, "{symbol}: funding={rate_pct:.4}% ({payer})");
            if funding.recent_rates.len() >= 3 {
                let avg: f64 = funding.recent_rates.iter().take(3).map(|r| r.funding_rate).sum::<f64>() / 3.0 * 100.0;
                let _ = write!(p, " avg3={avg:.4}%");
            }
            if let Some(oi) = funding.open_interest {
                let _ = write!(p, " open_interest={oi:.0}");
            }
            p.push('\n');
        }
        if let Some(spread) = sym.depth.as_ref().and_then(|d| d.spread_percent()) {
            let _ = writeln!(p, "{symbol}: bid/ask spread={spread:.3}%");
        }
    }

    if snapshot.partial {
        p.push_str("\nNOTE: this snapshot is partial; some fields were unavailable. Be conservative.\n");
    }

    // -----------------------------------------------------------------
    // Session context & constraints
    // -----------------------------------------------------------------
    let _ = writeln!(
        p,
        "\n=== Session ===\n{} minutes since the session started; this is call number {}. Current time: {}.",
        session.elapsed_minutes,
        session.call_count,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    );

    let _ = writeln!(
        p,
        "\n=== Execution requirements ===\n\
         - Symbols under management: {}\n\
         - Core timeframes: {}\n\
         - Opening/adding requires usdt_amount; managing positions uses reduce_percent / reduce_usdt / close_percent\n\
         - LIMIT orders require entry_price; reduce/close orders are submitted reduce-only automatically\n\
         - Respect the directional stop constraints (long: SL < price - 1 tick, TP > price + 1 tick; short mirrored)",
        symbols.join(", "),
        timeframes.join(", "),
    );

    p
}

/// One-line market digest for the think stream.
pub fn market_summary(snapshot: &MarketSnapshot, symbols: &[String]) -> String {
    let mut parts = Vec::new();
    if let Some(a) = &snapshot.account {
        parts.push(format!(
            "balance {:.2} USDT, unrealized {:+.2} USDT",
            a.total_wallet_balance, a.total_unrealized_pnl
        ));
    }
    let mut prices = Vec::new();
    for symbol in symbols {
        if let Some(t) = snapshot.symbol(symbol).and_then(|s| s.ticker.as_ref()) {
            prices.push(format!(
                "{} {:.2} ({:+.2}%)",
                symbol, t.last_price, t.price_change_percent
            ));
        }
    }
    if !prices.is_empty() {
        parts.push(prices.join(", "));
    }
    if parts.is_empty() {
        format!("snapshot taken at {}", snapshot.taken_at.format("%H:%M:%S"))
    } else {
        parts.join(" | ")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountSummary, PositionInfo, TickerStats};

    fn snapshot_with_position() -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::default();
        snapshot.account = Some(AccountSummary {
            total_wallet_balance: 1000.0,
            total_margin_balance: 1000.0,
            total_unrealized_pnl: 12.5,
            available_balance: 800.0,
        });
        snapshot.positions.push(PositionInfo {
            symbol: "BTCUSDT".into(),
            position_amount: 0.02,
            entry_price: 30000.0,
            mark_price: 30100.0,
            unrealized_pnl: 2.0,
            leverage: 5,
            isolated: false,
        });
        let mut sym = crate::market_data::snapshot::SymbolSnapshot {
            symbol: "BTCUSDT".into(),
            ..Default::default()
        };
        sym.ticker = Some(TickerStats {
            symbol: "BTCUSDT".into(),
            last_price: 30100.0,
            price_change_percent: 1.5,
            high_price: 30500.0,
            low_price: 29500.0,
            volume: 1000.0,
            quote_volume: 0.0,
        });
        snapshot.per_symbol.insert("BTCUSDT".into(), sym);
        snapshot
    }

    #[test]
    fn system_prompt_declares_schema_and_actions() {
        let sp = build_system_prompt();
        assert!(sp.contains("market_overview"));
        assert!(sp.contains("recommendations"));
        assert!(sp.contains("cancel_tp_sl"));
        assert!(sp.contains("usdt_amount"));
        assert!(sp.contains("Reasoning"));
    }

    #[test]
    fn user_prompt_carries_account_positions_and_session() {
        let snapshot = snapshot_with_position();
        let session = SessionContext { elapsed_minutes: 45, call_count: 4, strategy: "default".into() };
        let up = build_user_prompt(
            &snapshot,
            &["BTCUSDT".to_string()],
            &["1h".to_string()],
            &session,
        );
        assert!(up.contains("available: 800.00 USDT"));
        assert!(up.contains("[BTCUSDT] LONG"));
        assert!(up.contains("call number 4"));
        assert!(up.contains("45 minutes"));
        assert!(up.contains("last=30100.00"));
    }

    #[test]
    fn partial_snapshots_are_flagged_in_the_prompt() {
        let mut snapshot = snapshot_with_position();
        snapshot.partial = true;
        let up = build_user_prompt(&snapshot, &["BTCUSDT".to_string()], &[], &SessionContext::default());
        assert!(up.contains("snapshot is partial"));
    }

    #[test]
    fn market_summary_mentions_balance_and_prices() {
        let snapshot = snapshot_with_position();
        let s = market_summary(&snapshot, &["BTCUSDT".to_string()]);
        assert!(s.contains("balance 1000.00"));
        assert!(s.contains("BTCUSDT 30100.00"));
    }
}
