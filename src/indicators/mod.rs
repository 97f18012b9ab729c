// =============================================================================
// Technical Indicators — multi-timeframe bundle for the analysis prompt
// =============================================================================
//
// Pure, side-effect-free computations over an OHLCV series. `compute` returns
// the full named bundle (`sma_20`, `rsi`, `macd`, `bb_upper`, `atr`,
// `volatility_7d`, ...) as a flat name → value map; indicators whose window
// exceeds the available history are simply absent from the map.
//
// Windows:
//   SMA 7/20/50/200, EMA 12/26/50, RSI 14 (Wilder), MACD 12/26/9,
//   Bollinger 20 ± 2σ, ATR 14, volatility over 168/720 hourly returns,
//   volume SMA 20, trend strength = R² of a linear fit over the last 20 closes.
// =============================================================================

use std::collections::BTreeMap;

use crate::market_data::candles::Candle;

/// Minimum series length before any bundle is produced.
const MIN_CANDLES: usize = 50;

/// Compute the named indicator bundle for one timeframe.
pub fn compute(candles: &[Candle], timeframe: &str) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    if candles.len() < MIN_CANDLES {
        return out;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let current_price = *closes.last().expect("non-empty series");

    let mut put = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            if v.is_finite() {
                out.insert(key.to_string(), v);
            }
        }
    };

    put("current_price", Some(current_price));
    if closes.len() >= 25 {
        let past = closes[closes.len() - 25];
        put("price_change_24h", Some((current_price - past) / past * 100.0));
    }

    // --- Moving averages -----------------------------------------------------
    put("sma_7", sma(&closes, 7));
    put("sma_20", sma(&closes, 20));
    put("sma_50", sma(&closes, 50));
    put("sma_200", sma(&closes, 200));
    put("ema_12", ema(&closes, 12));
    put("ema_26", ema(&closes, 26));
    put("ema_50", ema(&closes, 50));

    // --- RSI ------------------------------------------------------------------
    put("rsi", rsi(&closes, 14));

    // --- MACD -----------------------------------------------------------------
    if let Some((macd, signal, histogram)) = macd(&closes) {
        put("macd", Some(macd));
        put("macd_signal", Some(signal));
        put("macd_histogram", Some(histogram));
    }

    // --- Bollinger bands ------------------------------------------------------
    if let Some((upper, middle, lower)) = bollinger(&closes, 20, 2.0) {
        put("bb_upper", Some(upper));
        put("bb_middle", Some(middle));
        put("bb_lower", Some(lower));
        if middle > 0.0 {
            put("bb_width", Some((upper - lower) / middle * 100.0));
        }
        if upper > lower {
            put("bb_position", Some((current_price - lower) / (upper - lower) * 100.0));
        }
    }

    // --- Volatility (annualless, percentage of price) -------------------------
    // 7-day and 30-day windows only make sense on the hourly series.
    if timeframe == "1h" {
        put("volatility_7d", volatility(&closes, 168));
        put("volatility_30d", volatility(&closes, 720));
    }

    // --- ATR ------------------------------------------------------------------
    if let Some(atr) = atr(candles, 14) {
        put("atr", Some(atr));
        if current_price > 0.0 {
            put("atr_percentage", Some(atr / current_price * 100.0));
        }
    }

    // --- Volume ---------------------------------------------------------------
    let last_volume = *volumes.last().expect("non-empty series");
    put("volume", Some(last_volume));
    if let Some(vol_sma) = sma(&volumes, 20) {
        put("volume_sma", Some(vol_sma));
        if vol_sma > 0.0 {
            put("volume_ratio", Some(last_volume / vol_sma));
        }
    }

    // --- Price ranges ---------------------------------------------------------
    let tail = |n: usize| &candles[candles.len().saturating_sub(n)..];
    let range24 = tail(24);
    put("high_24h", range24.iter().map(|c| c.high).fold(None, fmax));
    put("low_24h", range24.iter().map(|c| c.low).fold(None, fmin));
    if timeframe == "1h" && candles.len() >= 168 {
        let range7d = tail(168);
        put("high_7d", range7d.iter().map(|c| c.high).fold(None, fmax));
        put("low_7d", range7d.iter().map(|c| c.low).fold(None, fmin));
    }

    // --- Trend ---------------------------------------------------------------
    put("trend_strength", trend_strength(&closes, 20));
    if closes.len() >= 11 {
        let past = closes[closes.len() - 11];
        if past > 0.0 {
            put("momentum", Some((current_price - past) / past * 100.0));
        }
    }

    out
}

fn fmax(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn fmin(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Simple moving average over the last `window` values.
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let slice = &values[values.len() - window..];
    Some(slice.iter().sum::<f64>() / window as f64)
}

/// Exponential moving average (seeded with the first value) — last value of
/// the series.
pub fn ema(values: &[f64], span: usize) -> Option<f64> {
    ema_series(values, span).last().copied()
}

fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() || span == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for &v in &values[1..] {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// RSI with Wilder's smoothing. Needs `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (mut avg_gain, mut avg_loss) = deltas[..period].iter().fold((0.0, 0.0), |(g, l), &d| {
        if d > 0.0 { (g + d, l) } else { (g, l - d) }
    });
    let period_f = period as f64;
    avg_gain /= period_f;
    avg_loss /= period_f;

    for &d in &deltas[period..] {
        let (gain, loss) = if d > 0.0 { (d, 0.0) } else { (0.0, -d) };
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(12, 26) with a 9-period signal line. Returns (macd, signal, histogram).
pub fn macd(closes: &[f64]) -> Option<(f64, f64, f64)> {
    if closes.len() < 26 {
        return None;
    }
    let ema12 = ema_series(closes, 12);
    let ema26 = ema_series(closes, 26);
    let macd_series: Vec<f64> = ema12.iter().zip(&ema26).map(|(a, b)| a - b).collect();
    let signal = *ema_series(&macd_series, 9).last()?;
    let macd = *macd_series.last()?;
    Some((macd, signal, macd - signal))
}

/// Bollinger bands: SMA ± `k` standard deviations over `window` closes.
pub fn bollinger(closes: &[f64], window: usize, k: f64) -> Option<(f64, f64, f64)> {
    if closes.len() < window || window < 2 {
        return None;
    }
    let slice = &closes[closes.len() - window..];
    let mean = slice.iter().sum::<f64>() / window as f64;
    let variance =
        slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    let std = variance.sqrt();
    Some((mean + k * std, mean, mean - k * std))
}

/// Average True Range over `period` bars (simple mean of true ranges).
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();
    let slice = &trs[trs.len() - period..];
    Some(slice.iter().sum::<f64>() / period as f64)
}

/// Rolling volatility: standard deviation of per-bar returns over `window`
/// bars, scaled by √24 to a daily figure, in percent.
fn volatility(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    let slice = &returns[returns.len() - window..];
    let mean = slice.iter().sum::<f64>() / window as f64;
    let variance =
        slice.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    Some(variance.sqrt() * 24f64.sqrt() * 100.0)
}

/// R² of a least-squares line through the last `window` closes, in percent.
/// High values mean price is moving in a straight line (strong trend).
fn trend_strength(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window || window < 2 {
        return None;
    }
    let y = &closes[closes.len() - window..];
    let n = window as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (i, &yi) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = yi - y_mean;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    Some(r * r * 100.0)
}
