// =============================================================================
// Snapshot Assembler — one immutable MarketSnapshot per analysis cycle
// =============================================================================
//
// Account, positions, and open orders are fetched first; then every configured
// symbol is assembled concurrently (ticker, depth, funding, open interest, and
// one kline series + indicator bundle per timeframe) behind a bounded pool.
// A global deadline caps the whole pass: whatever arrived in time ships, the
// rest becomes error markers and the snapshot is flagged `partial`.
//
// A per-field failure never aborts the snapshot — the analysis prompt is
// simply built from less data.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::binance::BinanceFuturesClient;
use crate::indicators;
use crate::market_data::candles::kline_limit;
use crate::types::{AccountSummary, FundingInfo, OrderBookTop, OrderInfo, PositionInfo, TickerStats};

/// Depth levels requested per symbol.
const DEPTH_LIMIT: u32 = 10;
/// Funding-rate settlements kept per symbol.
const FUNDING_HISTORY: u32 = 10;

/// Everything known about one symbol at snapshot time. Missing fields carry a
/// marker in `errors` instead of failing the cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub ticker: Option<TickerStats>,
    pub depth: Option<OrderBookTop>,
    pub funding: Option<FundingInfo>,
    /// timeframe → indicator name → value
    pub timeframes: BTreeMap<String, BTreeMap<String, f64>>,
    pub errors: Vec<String>,
}

impl SymbolSnapshot {
    pub fn last_price(&self) -> Option<f64> {
        self.ticker.as_ref().map(|t| t.last_price).filter(|p| *p > 0.0)
    }
}

/// Immutable view of market and account state for one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketSnapshot {
    pub taken_at: DateTime<Utc>,
    pub account: Option<AccountSummary>,
    pub positions: Vec<PositionInfo>,
    /// Pending orders grouped by symbol.
    pub open_orders: HashMap<String, Vec<OrderInfo>>,
    pub per_symbol: HashMap<String, SymbolSnapshot>,
    /// Set when any field is missing or the global deadline fired.
    pub partial: bool,
    pub errors: Vec<String>,
}

impl MarketSnapshot {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolSnapshot> {
        self.per_symbol.get(symbol)
    }

    pub fn protective_orders(&self, symbol: &str) -> Vec<&OrderInfo> {
        self.open_orders
            .get(symbol)
            .map(|orders| orders.iter().filter(|o| o.is_protective()).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

pub struct SnapshotAssembler {
    client: Arc<BinanceFuturesClient>,
    symbols: Vec<String>,
    timeframes: Vec<String>,
    max_concurrency: usize,
    deadline: std::time::Duration,
}

impl SnapshotAssembler {
    pub fn new(
        client: Arc<BinanceFuturesClient>,
        symbols: Vec<String>,
        timeframes: Vec<String>,
        max_concurrency: usize,
        deadline: std::time::Duration,
    ) -> Self {
        Self {
            client,
            symbols,
            timeframes,
            max_concurrency: max_concurrency.max(1),
            deadline,
        }
    }

    /// Build one snapshot. Never fails; degradation is recorded in the
    /// snapshot itself.
    pub async fn assemble(&self) -> MarketSnapshot {
        let started = std::time::Instant::now();
        let mut snapshot = MarketSnapshot { taken_at: Utc::now(), ..Default::default() };

        // -----------------------------------------------------------------
        // Account-scope data (three sequential signed calls)
        // -----------------------------------------------------------------
        match self.client.get_account().await {
            Ok(account) => snapshot.account = Some(account),
            Err(e) => snapshot.errors.push(format!("account: {e}")),
        }
        match self.client.get_positions().await {
            Ok(positions) => snapshot.positions = positions,
            Err(e) => snapshot.errors.push(format!("positions: {e}")),
        }
        match self.client.get_open_orders(None).await {
            Ok(orders) => {
                let mut grouped: HashMap<String, Vec<OrderInfo>> = HashMap::new();
                for order in orders {
                    grouped.entry(order.symbol.clone()).or_default().push(order);
                }
                snapshot.open_orders = grouped;
            }
            Err(e) => snapshot.errors.push(format!("open_orders: {e}")),
        }

        // -----------------------------------------------------------------
        // Per-symbol data behind a bounded pool and a global deadline
        // -----------------------------------------------------------------
        let mut tasks = stream::iter(self.symbols.clone())
            .map(|symbol| {
                let client = self.client.clone();
                let timeframes = self.timeframes.clone();
                async move { fetch_symbol(&client, symbol, &timeframes).await }
            })
            .buffer_unordered(self.max_concurrency);

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    snapshot.partial = true;
                    snapshot.errors.push(format!(
                        "snapshot deadline ({}s) fired with {}/{} symbols ready",
                        self.deadline.as_secs(),
                        snapshot.per_symbol.len(),
                        self.symbols.len(),
                    ));
                    warn!(
                        ready = snapshot.per_symbol.len(),
                        total = self.symbols.len(),
                        "snapshot deadline fired — shipping partial snapshot"
                    );
                    break;
                }
                item = tasks.next() => match item {
                    Some(sym_snapshot) => {
                        if !sym_snapshot.errors.is_empty() {
                            snapshot.partial = true;
                        }
                        snapshot.per_symbol.insert(sym_snapshot.symbol.clone(), sym_snapshot);
                    }
                    None => break,
                }
            }
        }

        if !snapshot.errors.is_empty() {
            snapshot.partial = true;
        }

        info!(
            symbols = snapshot.per_symbol.len(),
            positions = snapshot.positions.len(),
            partial = snapshot.partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "market snapshot assembled"
        );
        snapshot
    }
}

/// Fetch everything for one symbol. Individual failures degrade to error
/// markers on the symbol.
async fn fetch_symbol(
    client: &BinanceFuturesClient,
    symbol: String,
    timeframes: &[String],
) -> SymbolSnapshot {
    let mut snap = SymbolSnapshot { symbol: symbol.clone(), ..Default::default() };

    match client.get_ticker(&symbol).await {
        Ok(ticker) => snap.ticker = Some(ticker),
        Err(e) => snap.errors.push(format!("ticker: {e}")),
    }

    match client.get_order_book(&symbol, DEPTH_LIMIT).await {
        Ok(depth) => snap.depth = Some(depth),
        Err(e) => snap.errors.push(format!("depth: {e}")),
    }

    let mut funding = FundingInfo::default();
    match client.get_funding_rates(&symbol, FUNDING_HISTORY).await {
        Ok(rates) => {
            funding.current_rate = rates.first().cloned();
            funding.recent_rates = rates;
        }
        Err(e) => snap.errors.push(format!("funding: {e}")),
    }
    match client.get_open_interest(&symbol).await {
        Ok(oi) => funding.open_interest = Some(oi),
        Err(e) => snap.errors.push(format!("open_interest: {e}")),
    }
    snap.funding = Some(funding);

    for timeframe in timeframes {
        match client.get_klines(&symbol, timeframe, kline_limit(timeframe)).await {
            Ok(candles) => {
                let bundle = indicators::compute(&candles, timeframe);
                if bundle.is_empty() {
                    debug!(symbol = %symbol, timeframe = %timeframe, "series too short for indicators");
                } else {
                    snap.timeframes.insert(timeframe.clone(), bundle);
                }
            }
            Err(e) => snap.errors.push(format!("klines {timeframe}: {e}")),
        }
    }

    debug!(
        symbol = %symbol,
        timeframes = snap.timeframes.len(),
        errors = snap.errors.len(),
        "symbol snapshot assembled"
    );
    snap
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn protective(symbol: &str, order_type: &str, id: u64) -> OrderInfo {
        OrderInfo {
            order_id: id,
            symbol: symbol.into(),
            status: "NEW".into(),
            side: "SELL".into(),
            order_type: order_type.into(),
            time_in_force: "GTC".into(),
            orig_qty: 1.0,
            executed_qty: 0.0,
            price: 0.0,
            stop_price: 95.0,
            avg_price: 0.0,
            reduce_only: true,
        }
    }

    #[test]
    fn protective_orders_filtered_by_type() {
        let mut open_orders = HashMap::new();
        open_orders.insert(
            "BTCUSDT".to_string(),
            vec![
                protective("BTCUSDT", "STOP_MARKET", 1),
                protective("BTCUSDT", "TAKE_PROFIT_MARKET", 2),
                protective("BTCUSDT", "LIMIT", 3),
            ],
        );
        let snapshot = MarketSnapshot { open_orders, ..Default::default() };
        let prot = snapshot.protective_orders("BTCUSDT");
        assert_eq!(prot.len(), 2);
        assert!(snapshot.protective_orders("ETHUSDT").is_empty());
    }

    #[test]
    fn symbol_snapshot_last_price_requires_positive_ticker() {
        let mut snap = SymbolSnapshot::default();
        assert!(snap.last_price().is_none());
        snap.ticker = Some(TickerStats { last_price: 0.0, ..Default::default() });
        assert!(snap.last_price().is_none());
        snap.ticker = Some(TickerStats { last_price: 30000.0, ..Default::default() });
        assert!((snap.last_price().unwrap() - 30000.0).abs() < 1e-9);
    }
}
