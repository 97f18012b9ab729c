// =============================================================================
// Symbol Filters — exchange quantization rules and the per-process cache
// =============================================================================
//
// Binance rejects any order whose price is not a multiple of `tickSize`, whose
// quantity is not a multiple of `stepSize`, or whose notional value is below
// `minNotional`. Every price/quantity the engine sends goes through the
// helpers here first.
//
// Floating-point note: `price / tick` is not exact (29999.9 / 0.1 lands a hair
// below 299999), so increment snapping adds a small epsilon before flooring
// and subtracts it before ceiling, then rounds to the filter's precision.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Absolute tolerance applied to the value/increment ratio before snapping.
const SNAP_EPSILON: f64 = 1e-6;

/// Quantization rules for one symbol, extracted from `exchangeInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    pub tick_size: f64,
    pub step_size: f64,
    pub min_qty: f64,
    pub min_notional: f64,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// Number of decimal places implied by an increment like 0.001.
pub fn precision_of(increment: f64) -> u32 {
    if increment >= 1.0 || increment <= 0.0 {
        return 0;
    }
    let s = format!("{increment:.10}");
    let trimmed = s.trim_end_matches('0');
    match trimmed.split_once('.') {
        Some((_, frac)) => frac.len() as u32,
        None => 0,
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Largest multiple of `increment` that is ≤ `value` (within float tolerance).
pub fn floor_to_increment(value: f64, increment: f64, precision: u32) -> f64 {
    if increment <= 0.0 {
        return round_to(value, precision);
    }
    round_to((value / increment + SNAP_EPSILON).floor() * increment, precision)
}

/// Smallest multiple of `increment` that is ≥ `value` (within float tolerance).
pub fn ceil_to_increment(value: f64, increment: f64, precision: u32) -> f64 {
    if increment <= 0.0 {
        return round_to(value, precision);
    }
    round_to((value / increment - SNAP_EPSILON).ceil() * increment, precision)
}

impl SymbolFilters {
    /// Snap a quantity down to the step grid.
    pub fn snap_qty_down(&self, qty: f64) -> f64 {
        floor_to_increment(qty, self.step_size, self.quantity_precision)
    }

    /// Snap a quantity up to the step grid.
    pub fn snap_qty_up(&self, qty: f64) -> f64 {
        ceil_to_increment(qty, self.step_size, self.quantity_precision)
    }

    /// Snap a price down to the tick grid (for levels that must stay *below*
    /// a reference price).
    pub fn price_down(&self, price: f64) -> f64 {
        floor_to_increment(price, self.tick_size, self.price_precision)
    }

    /// Snap a price up to the tick grid (for levels that must stay *above* a
    /// reference price).
    pub fn price_up(&self, price: f64) -> f64 {
        ceil_to_increment(price, self.tick_size, self.price_precision)
    }

    /// Snap a price to the nearest tick (entry prices, no directional rule).
    pub fn price_nearest(&self, price: f64) -> f64 {
        if self.tick_size <= 0.0 {
            return round_to(price, self.price_precision);
        }
        round_to((price / self.tick_size).round() * self.tick_size, self.price_precision)
    }

    /// Render a quantity with the exact number of decimals the exchange
    /// expects (avoids scientific notation and trailing noise).
    pub fn format_qty(&self, qty: f64) -> String {
        format!("{:.*}", self.quantity_precision as usize, qty)
    }

    pub fn format_price(&self, price: f64) -> String {
        format!("{:.*}", self.price_precision as usize, price)
    }

    /// Parse one `symbols[]` entry of the `exchangeInfo` payload.
    pub fn from_exchange_info(entry: &serde_json::Value) -> Result<Self> {
        let symbol = entry["symbol"]
            .as_str()
            .context("exchangeInfo entry missing 'symbol'")?
            .to_string();

        let mut tick_size = 0.01;
        let mut step_size = 0.001;
        let mut min_qty = 0.001;
        let mut min_notional = 5.0;

        let filters = entry["filters"].as_array().cloned().unwrap_or_default();
        for f in &filters {
            match f["filterType"].as_str().unwrap_or("") {
                "PRICE_FILTER" => {
                    tick_size = str_f64(&f["tickSize"]).unwrap_or(tick_size);
                }
                "LOT_SIZE" => {
                    step_size = str_f64(&f["stepSize"]).unwrap_or(step_size);
                    min_qty = str_f64(&f["minQty"]).unwrap_or(step_size);
                }
                "MIN_NOTIONAL" => {
                    // Futures exchangeInfo spells this field `notional`.
                    min_notional = str_f64(&f["notional"])
                        .or_else(|| str_f64(&f["minNotional"]))
                        .unwrap_or(min_notional);
                }
                _ => {}
            }
        }

        Ok(Self {
            symbol,
            tick_size,
            step_size,
            min_qty,
            min_notional,
            price_precision: precision_of(tick_size),
            quantity_precision: precision_of(step_size),
        })
    }
}

fn str_f64(v: &serde_json::Value) -> Option<f64> {
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_f64()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Per-process cache of symbol filters. `exchangeInfo` is fetched once per
/// symbol and reused for the lifetime of the run.
#[derive(Debug, Default)]
pub struct FilterCache {
    inner: RwLock<HashMap<String, SymbolFilters>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolFilters> {
        self.inner.read().get(symbol).cloned()
    }

    pub fn insert(&self, filters: SymbolFilters) {
        debug!(
            symbol = %filters.symbol,
            tick_size = filters.tick_size,
            step_size = filters.step_size,
            min_notional = filters.min_notional,
            "symbol filters cached"
        );
        self.inner.write().insert(filters.symbol.clone(), filters);
    }
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

    #[test]
    fn precision_from_increment() {
        assert_eq!(precision_of(0.001), 3);
        assert_eq!(precision_of(0.1), 1);
        assert_eq!(precision_of(1.0), 0);
        assert_eq!(precision_of(10.0), 0);
        assert_eq!(precision_of(0.00000001), 8);
    }

    #[test]
    fn qty_snaps_down_to_step() {
        let f = btc_filters();
        // 100 USDT * 5x / 30000 = 0.016666... -> 0.016
        assert!((f.snap_qty_down(100.0 * 5.0 / 30000.0) - 0.016).abs() < 1e-12);
        // exact multiples are preserved
        assert!((f.snap_qty_down(0.02) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn qty_snaps_up_to_step() {
        let f = btc_filters();
        assert!((f.snap_qty_up(0.0161) - 0.017).abs() < 1e-12);
        assert!((f.snap_qty_up(0.016) - 0.016).abs() < 1e-12);
    }

    #[test]
    fn price_snapping_survives_float_noise() {
        let f = btc_filters();
        // 30000 - 0.1 computed in floats lands just below the grid point
        let target = 30000.0 - 0.1;
        assert!((f.price_down(target) - 29999.9).abs() < 1e-9);
        assert!((f.price_up(target) - 29999.9).abs() < 1e-9);
    }

    #[test]
    fn price_down_and_up_move_to_grid() {
        let f = btc_filters();
        assert!((f.price_down(29700.04) - 29700.0).abs() < 1e-9);
        assert!((f.price_up(30599.91) - 30600.0).abs() < 1e-9);
        assert!((f.price_nearest(29980.04) - 29980.0).abs() < 1e-9);
    }

    #[test]
    fn formats_with_filter_precision() {
        let f = btc_filters();
        assert_eq!(f.format_qty(0.016), "0.016");
        assert_eq!(f.format_price(29999.9), "29999.9");
    }

    #[test]
    fn parses_exchange_info_entry() {
        let entry = serde_json::json!({
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"},
                {"filterType": "MIN_NOTIONAL", "notional": "5"}
            ]
        });
        let f = SymbolFilters::from_exchange_info(&entry).unwrap();
        assert_eq!(f.symbol, "BTCUSDT");
        assert!((f.tick_size - 0.1).abs() < 1e-12);
        assert!((f.step_size - 0.001).abs() < 1e-12);
        assert!((f.min_notional - 5.0).abs() < 1e-12);
        assert_eq!(f.price_precision, 1);
        assert_eq!(f.quantity_precision, 3);
    }

    #[test]
    fn cache_roundtrip() {
        let cache = FilterCache::new();
        assert!(cache.get("BTCUSDT").is_none());
        cache.insert(btc_filters());
        let f = cache.get("BTCUSDT").unwrap();
        assert!((f.tick_size - 0.1).abs() < 1e-12);
    }
}
