// =============================================================================
// Canonical exchange-facing types shared across the Orion trading engine
// =============================================================================
//
// The exchange speaks several dialects for the same concept (`positionAmt` vs
// `position_amount`, `unRealizedProfit` vs `unrealizedPnl`). Everything is
// translated to this one snake_case schema at the adapter boundary; the core
// never carries both spellings.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Order side as sent to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// The side that closes a position opened with `self`.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// USDT-denominated account summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSummary {
    pub total_wallet_balance: f64,
    pub total_margin_balance: f64,
    pub total_unrealized_pnl: f64,
    pub available_balance: f64,
}

/// One open position as reported by the exchange. `position_amount` is signed:
/// positive for longs, negative for shorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub position_amount: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
    pub isolated: bool,
}

impl PositionInfo {
    pub fn side(&self) -> PositionSide {
        if self.position_amount >= 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        }
    }

    pub fn quantity(&self) -> f64 {
        self.position_amount.abs()
    }
}

/// One resting order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    pub side: String,
    pub order_type: String,
    pub time_in_force: String,
    pub orig_qty: f64,
    pub executed_qty: f64,
    pub price: f64,
    pub stop_price: f64,
    pub avg_price: f64,
    pub reduce_only: bool,
}

impl OrderInfo {
    /// Whether this is a protective order (stop-loss or take-profit).
    pub fn is_protective(&self) -> bool {
        matches!(self.order_type.as_str(), "STOP_MARKET" | "TAKE_PROFIT_MARKET")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED"
        )
    }
}

/// 24-hour rolling ticker statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerStats {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

/// Top-of-book depth snapshot, best levels first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookTop {
    /// (price, quantity) pairs, best bid first.
    pub bids: Vec<(f64, f64)>,
    /// (price, quantity) pairs, best ask first.
    pub asks: Vec<(f64, f64)>,
}

impl OrderBookTop {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p).filter(|p| *p > 0.0)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p).filter(|p| *p > 0.0)
    }

    /// Bid/ask spread as a percentage of the best bid.
    pub fn spread_percent(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((ask - bid) / bid * 100.0)
    }
}

/// One historical funding-rate settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRatePoint {
    pub funding_rate: f64,
    pub funding_time: i64,
}

/// Funding-rate and open-interest digest for a symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingInfo {
    /// Most recent settlement, if any.
    pub current_rate: Option<FundingRatePoint>,
    /// Recent settlements, newest first.
    pub recent_rates: Vec<FundingRatePoint>,
    pub open_interest: Option<f64>,
}

impl FundingInfo {
    pub fn current_rate_value(&self) -> f64 {
        self.current_rate.as_ref().map(|r| r.funding_rate).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_side_from_sign() {
        let long = PositionInfo {
            symbol: "BTCUSDT".into(),
            position_amount: 0.02,
            entry_price: 30000.0,
            mark_price: 30100.0,
            unrealized_pnl: 2.0,
            leverage: 5,
            isolated: false,
        };
        assert_eq!(long.side(), PositionSide::Long);
        assert!((long.quantity() - 0.02).abs() < 1e-12);

        let short = PositionInfo { position_amount: -0.5, ..long.clone() };
        assert_eq!(short.side(), PositionSide::Short);
        assert!((short.quantity() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn spread_percent_computed_from_best_levels() {
        let book = OrderBookTop {
            bids: vec![(100.0, 1.0), (99.5, 2.0)],
            asks: vec![(102.0, 1.0), (102.5, 2.0)],
        };
        let spread = book.spread_percent().unwrap();
        assert!((spread - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_book_has_no_spread() {
        let book = OrderBookTop::default();
        assert!(book.best_bid().is_none());
        assert!(book.spread_percent().is_none());
    }

    #[test]
    fn protective_order_detection() {
        let mut order = OrderInfo {
            order_id: 1,
            symbol: "ETHUSDT".into(),
            status: "NEW".into(),
            side: "SELL".into(),
            order_type: "STOP_MARKET".into(),
            time_in_force: "GTC".into(),
            orig_qty: 1.0,
            executed_qty: 0.0,
            price: 0.0,
            stop_price: 2900.0,
            avg_price: 0.0,
            reduce_only: true,
        };
        assert!(order.is_protective());
        order.order_type = "LIMIT".into();
        assert!(!order.is_protective());
    }
}
