// =============================================================================
// Safety Gate — pre-trade checks for open/add decisions
// =============================================================================
//
// Three checks run in order against the cycle's snapshot; the first failure
// short-circuits. The gate is a pure function of (decision, snapshot slice,
// toggles): same inputs, same verdict, same reason — it can run any number of
// times without side effects. Reduce/close and risk-only actions bypass the
// gate entirely; they shrink exposure.
// =============================================================================

use serde::Serialize;

use crate::config::PreTradeChecks;
use crate::decision::Decision;
use crate::types::{AccountSummary, OrderBookTop, TickerStats};

/// Absolute 24 h price change (percent) above which the market is considered
/// anomalous.
const MAX_PRICE_CHANGE_PCT: f64 = 20.0;
/// Bid/ask spread (percent of bid) at or above which the book is too thin.
const MAX_SPREAD_PCT: f64 = 1.0;

/// Outcome of the gate. `reason` explains a rejection or confirms the pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub passed: bool,
    pub reason: String,
}

impl SafetyVerdict {
    fn pass() -> Self {
        Self { passed: true, reason: "all safety checks passed".into() }
    }

    fn fail(reason: String) -> Self {
        Self { passed: false, reason }
    }
}

/// Run the pre-trade checks for one open/add decision.
pub fn pre_trade_check(
    decision: &Decision,
    account: Option<&AccountSummary>,
    ticker: Option<&TickerStats>,
    depth: Option<&OrderBookTop>,
    checks: &PreTradeChecks,
) -> SafetyVerdict {
    if !decision.action.is_open_like() {
        return SafetyVerdict::pass();
    }

    // --- Balance -------------------------------------------------------------
    if checks.check_balance {
        let Some(amount) = decision.usdt_amount else {
            return SafetyVerdict::fail(format!(
                "{} requires usdt_amount but none was provided",
                decision.action
            ));
        };
        let Some(account) = account else {
            return SafetyVerdict::fail("account data unavailable for balance check".into());
        };
        if account.available_balance < amount {
            return SafetyVerdict::fail(format!(
                "insufficient balance: need {:.2} USDT, available {:.2} USDT",
                amount, account.available_balance
            ));
        }
    }

    // --- Price anomaly -------------------------------------------------------
    if checks.check_price_anomaly {
        if let Some(ticker) = ticker {
            if ticker.price_change_percent.abs() > MAX_PRICE_CHANGE_PCT {
                return SafetyVerdict::fail(format!(
                    "abnormal 24h price move: {:+.2}%",
                    ticker.price_change_percent
                ));
            }
        }
    }

    // --- Liquidity -----------------------------------------------------------
    if checks.check_liquidity {
        let Some(depth) = depth else {
            return SafetyVerdict::fail("order book unavailable for liquidity check".into());
        };
        let (Some(_bid), Some(_ask)) = (depth.best_bid(), depth.best_ask()) else {
            return SafetyVerdict::fail("order book has no best bid/ask".into());
        };
        let spread = depth.spread_percent().unwrap_or(f64::INFINITY);
        if spread >= MAX_SPREAD_PCT {
            return SafetyVerdict::fail(format!("spread too wide: {spread:.3}%"));
        }
    }

    SafetyVerdict::pass()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{
        assess_risk, Decision, EntryType, FundingImpact, TradeAction,
    };
    use chrono::Utc;

    fn decision(action: TradeAction, usdt: Option<f64>) -> Decision {
        Decision {
            symbol: "BTCUSDT".into(),
            action,
            confidence: 75.0,
            leverage: 5,
            entry_type: EntryType::Market,
            entry_price: None,
            usdt_amount: usdt,
            reduce_percent: None,
            reduce_usdt: None,
            close_percent: None,
            stop_loss_price: None,
            take_profit_prices: Vec::new(),
            current_price: 30000.0,
            funding_rate_pct: 0.0,
            funding_impact: FundingImpact::Neutral,
            risk_assessment: assess_risk(5, None, 0.0, "medium"),
            risk_level: "medium".into(),
            reason: String::new(),
            risk_reward: String::new(),
            cost_benefit: serde_json::Value::Null,
            should_execute: true,
            timestamp: Utc::now(),
        }
    }

    fn account(available: f64) -> AccountSummary {
        AccountSummary { available_balance: available, ..Default::default() }
    }

    fn calm_ticker() -> TickerStats {
        TickerStats { price_change_percent: 2.0, last_price: 30000.0, ..Default::default() }
    }

    fn tight_book() -> OrderBookTop {
        OrderBookTop { bids: vec![(29999.0, 1.0)], asks: vec![(30001.0, 1.0)] }
    }

    fn all_checks() -> PreTradeChecks {
        PreTradeChecks { check_balance: true, check_price_anomaly: true, check_liquidity: true }
    }

    #[test]
    fn passes_with_healthy_inputs() {
        let v = pre_trade_check(
            &decision(TradeAction::Long, Some(50.0)),
            Some(&account(100.0)),
            Some(&calm_ticker()),
            Some(&tight_book()),
            &all_checks(),
        );
        assert!(v.passed, "{}", v.reason);
    }

    #[test]
    fn insufficient_balance_fails_first() {
        let v = pre_trade_check(
            &decision(TradeAction::Long, Some(500.0)),
            Some(&account(100.0)),
            Some(&calm_ticker()),
            Some(&tight_book()),
            &all_checks(),
        );
        assert!(!v.passed);
        assert!(v.reason.contains("insufficient balance"), "{}", v.reason);
    }

    #[test]
    fn price_anomaly_fails() {
        let wild = TickerStats { price_change_percent: -25.0, ..Default::default() };
        let v = pre_trade_check(
            &decision(TradeAction::AddToShort, Some(50.0)),
            Some(&account(100.0)),
            Some(&wild),
            Some(&tight_book()),
            &all_checks(),
        );
        assert!(!v.passed);
        assert!(v.reason.contains("abnormal 24h price move"), "{}", v.reason);
    }

    #[test]
    fn wide_spread_fails() {
        // bid 100, ask 102 => 2% spread
        let wide = OrderBookTop { bids: vec![(100.0, 1.0)], asks: vec![(102.0, 1.0)] };
        let v = pre_trade_check(
            &decision(TradeAction::Long, Some(50.0)),
            Some(&account(100.0)),
            Some(&calm_ticker()),
            Some(&wide),
            &all_checks(),
        );
        assert!(!v.passed);
        assert!(v.reason.contains("spread too wide"), "{}", v.reason);
    }

    #[test]
    fn empty_book_fails() {
        let v = pre_trade_check(
            &decision(TradeAction::Long, Some(50.0)),
            Some(&account(100.0)),
            Some(&calm_ticker()),
            Some(&OrderBookTop::default()),
            &all_checks(),
        );
        assert!(!v.passed);
        assert!(v.reason.contains("no best bid/ask"), "{}", v.reason);
    }

    #[test]
    fn reduce_and_risk_actions_bypass_the_gate() {
        for action in [TradeAction::CloseLong, TradeAction::ReduceShort, TradeAction::CancelTpSl] {
            let v = pre_trade_check(&decision(action, None), None, None, None, &all_checks());
            assert!(v.passed, "{action} should bypass the gate");
        }
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let only_balance = PreTradeChecks {
            check_balance: true,
            check_price_anomaly: false,
            check_liquidity: false,
        };
        // wild ticker and empty book would fail, but those checks are off
        let wild = TickerStats { price_change_percent: 50.0, ..Default::default() };
        let v = pre_trade_check(
            &decision(TradeAction::Long, Some(50.0)),
            Some(&account(100.0)),
            Some(&wild),
            None,
            &only_balance,
        );
        assert!(v.passed, "{}", v.reason);
    }

    #[test]
    fn gate_is_idempotent() {
        let d = decision(TradeAction::Long, Some(500.0));
        let acct = account(100.0);
        let first = pre_trade_check(&d, Some(&acct), Some(&calm_ticker()), Some(&tight_book()), &all_checks());
        let second = pre_trade_check(&d, Some(&acct), Some(&calm_ticker()), Some(&tight_book()), &all_checks());
        assert_eq!(first, second);
    }
}
