// =============================================================================
// OHLCV candles fetched over the futures klines REST endpoint
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A single OHLCV candle parsed from Binance's array-of-arrays kline format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self { open_time, close_time, open, high, low, close, volume }
    }

    /// Parse one kline entry.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, ... (remaining fields unused here)
    pub fn from_kline(entry: &serde_json::Value) -> Result<Self> {
        let arr = entry.as_array().context("kline entry is not an array")?;
        if arr.len() < 7 {
            anyhow::bail!("kline entry has only {} elements", arr.len());
        }

        Ok(Self {
            open_time: arr[0].as_i64().unwrap_or(0),
            open: num(&arr[1])?,
            high: num(&arr[2])?,
            low: num(&arr[3])?,
            close: num(&arr[4])?,
            volume: num(&arr[5])?,
            close_time: arr[6].as_i64().unwrap_or(0),
        })
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn num(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

/// Kline history depth per timeframe, chosen so the longest indicator in the
/// bundle (SMA-200, 30-day volatility on 1h) always has enough bars.
pub fn kline_limit(timeframe: &str) -> u32 {
    match timeframe {
        "1m" => 200,
        "5m" => 288,
        "15m" => 336,
        "1h" => 720,
        "4h" => 180,
        "1d" => 365,
        "1w" => 104,
        "1M" => 36,
        _ => 200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_and_numeric_fields() {
        let entry = json!([1700000000000i64, "30000.5", "30100", "29900.1", 30050.0, "12.5",
                           1700000059999i64, "0", 10, "0", "0"]);
        let c = Candle::from_kline(&entry).unwrap();
        assert_eq!(c.open_time, 1700000000000);
        assert!((c.open - 30000.5).abs() < 1e-9);
        assert!((c.close - 30050.0).abs() < 1e-9);
        assert!((c.volume - 12.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_short_entries() {
        assert!(Candle::from_kline(&json!([1, "2", "3"])).is_err());
        assert!(Candle::from_kline(&json!({"not": "array"})).is_err());
    }

    #[test]
    fn limits_cover_longest_indicators() {
        // SMA-200 needs at least 200 bars on every timeframe that carries it.
        assert!(kline_limit("1m") >= 200);
        assert!(kline_limit("1h") >= 720); // 30-day volatility window
        assert_eq!(kline_limit("1M"), 36);
        assert_eq!(kline_limit("unknown"), 200);
    }
}
