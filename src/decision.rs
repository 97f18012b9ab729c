// =============================================================================
// Decision Normalizer — raw model recommendations to canonical decisions
// =============================================================================
//
// The model returns loosely-typed JSON: symbols with or without the USDT
// suffix, numbers as strings with thousands separators, actions in free case.
// This module owns all of that salvage and produces one canonical `Decision`
// per configured symbol that received a recommendation. Unknown actions
// degrade to `hold`; non-finite numbers are dropped; stop levels default to
// a leverage-adjusted band around the current price when the model omitted
// them.
//
// Execution gating is decided here and only here:
//   should_execute = action != hold && confidence >= min_confidence
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::llm::parse::Analysis;
use crate::market_data::snapshot::MarketSnapshot;
use crate::types::OrderSide;

// ---------------------------------------------------------------------------
// Action set
// ---------------------------------------------------------------------------

/// Closed action set. Everything the model may ask for maps into one of
/// these; anything unrecognised becomes `Hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Long,
    Short,
    AddToLong,
    AddToShort,
    ReduceLong,
    ReduceShort,
    CloseLong,
    CloseShort,
    AdjustTpSl,
    CancelTpSl,
    Hold,
}

impl TradeAction {
    /// Parse a raw action string, tolerating aliases (`buy`/`sell`).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "long" | "buy" => Self::Long,
            "short" | "sell" => Self::Short,
            "add_to_long" => Self::AddToLong,
            "add_to_short" => Self::AddToShort,
            "reduce_long" => Self::ReduceLong,
            "reduce_short" => Self::ReduceShort,
            "close_long" => Self::CloseLong,
            "close_short" => Self::CloseShort,
            "adjust_tp_sl" => Self::AdjustTpSl,
            "cancel_tp_sl" => Self::CancelTpSl,
            _ => Self::Hold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::AddToLong => "add_to_long",
            Self::AddToShort => "add_to_short",
            Self::ReduceLong => "reduce_long",
            Self::ReduceShort => "reduce_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
            Self::AdjustTpSl => "adjust_tp_sl",
            Self::CancelTpSl => "cancel_tp_sl",
            Self::Hold => "hold",
        }
    }

    /// Opens or grows exposure (sets leverage, runs the safety gate, places
    /// protective orders afterwards).
    pub fn is_open_like(&self) -> bool {
        matches!(self, Self::Long | Self::Short | Self::AddToLong | Self::AddToShort)
    }

    /// Shrinks exposure; always submitted reduce-only.
    pub fn is_reduce_like(&self) -> bool {
        matches!(
            self,
            Self::ReduceLong | Self::ReduceShort | Self::CloseLong | Self::CloseShort
        )
    }

    /// Touches only protective orders, never the position itself.
    pub fn is_risk_only(&self) -> bool {
        matches!(self, Self::AdjustTpSl | Self::CancelTpSl)
    }

    /// Exchange order side for actions that place an order.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            Self::Long | Self::AddToLong => Some(OrderSide::Buy),
            Self::Short | Self::AddToShort => Some(OrderSide::Sell),
            Self::ReduceLong | Self::CloseLong => Some(OrderSide::Sell),
            Self::ReduceShort | Self::CloseShort => Some(OrderSide::Buy),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry order type for open/add decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryType {
    Market,
    Limit,
}

/// Directional cost of the current funding rate for the decided side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingImpact {
    Positive,
    Negative,
    Neutral,
}

/// Futures-specific risk digest attached to every decision.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub total_risk_score: f64,
    pub leverage_risk: f64,
    pub volatility_risk: f64,
    pub funding_rate_risk: f64,
    pub market_risk: String,
}

/// Canonical decision consumed by the safety gate and the executor.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub symbol: String,
    pub action: TradeAction,
    pub confidence: f64,
    pub leverage: u32,
    pub entry_type: EntryType,
    pub entry_price: Option<f64>,
    /// Margin to commit, open/add only.
    pub usdt_amount: Option<f64>,
    pub reduce_percent: Option<f64>,
    pub reduce_usdt: Option<f64>,
    pub close_percent: Option<f64>,
    pub stop_loss_price: Option<f64>,
    /// First entry is the authoritative take-profit.
    pub take_profit_prices: Vec<f64>,
    pub current_price: f64,
    pub funding_rate_pct: f64,
    pub funding_impact: FundingImpact,
    pub risk_assessment: RiskAssessment,
    pub risk_level: String,
    pub reason: String,
    pub risk_reward: String,
    pub cost_benefit: Value,
    pub should_execute: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Normalizer configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub default_leverage: u32,
    /// Base stop-loss fraction (e.g. 0.05), divided by leverage.
    pub stop_loss_percent: f64,
    /// Base take-profit fraction (e.g. 0.15), divided by leverage.
    pub take_profit_percent: f64,
    pub min_confidence: f64,
    /// "MARKET" or "LIMIT", used when the model expressed no preference.
    pub default_order_type: String,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Map every configured symbol's recommendation (if any) to a `Decision`.
pub fn normalize_decisions(
    analysis: &Analysis,
    snapshot: &MarketSnapshot,
    symbols: &[String],
    cfg: &NormalizerConfig,
) -> Vec<Decision> {
    let mut decisions = Vec::new();

    for symbol in symbols {
        let Some(rec) = find_recommendation(&analysis.recommendations, symbol) else {
            continue;
        };
        let Some(last) = snapshot.symbol(symbol).and_then(|s| s.last_price()) else {
            debug!(symbol = %symbol, "no current price — recommendation dropped");
            continue;
        };
        decisions.push(build_decision(rec, symbol, last, analysis, snapshot, cfg));
    }

    decisions
}

/// Case-insensitive match tolerating suffix-less symbols ("btc" ≡ "BTCUSDT").
fn find_recommendation<'a>(recommendations: &'a [Value], symbol: &str) -> Option<&'a Value> {
    let full = symbol.to_uppercase();
    let bare = full.trim_end_matches("USDT").to_string();

    recommendations.iter().find(|rec| {
        let raw = rec["symbol"].as_str().unwrap_or("").trim().to_uppercase();
        !raw.is_empty() && (raw == full || raw == bare)
    })
}

fn build_decision(
    rec: &Value,
    symbol: &str,
    last: f64,
    analysis: &Analysis,
    snapshot: &MarketSnapshot,
    cfg: &NormalizerConfig,
) -> Decision {
    let action = TradeAction::parse(rec["action"].as_str().unwrap_or("hold"));
    let confidence = parse_number(&rec["confidence"]).unwrap_or(0.0).clamp(0.0, 100.0);

    let leverage = parse_number(&rec["leverage"])
        .map(|l| l as i64)
        .filter(|l| *l > 0)
        .map(|l| (l as u32).min(125))
        .unwrap_or(cfg.default_leverage);

    let entry_type = match rec["order_type"].as_str().map(str::to_uppercase).as_deref() {
        Some("LIMIT") => EntryType::Limit,
        Some("MARKET") => EntryType::Market,
        _ if cfg.default_order_type.eq_ignore_ascii_case("LIMIT") => EntryType::Limit,
        _ => EntryType::Market,
    };

    let (stop_loss_price, take_profit_prices) =
        stop_levels(rec, action, last, leverage, cfg);

    let funding_rate = snapshot
        .symbol(symbol)
        .and_then(|s| s.funding.as_ref())
        .map(|f| f.current_rate_value())
        .unwrap_or(0.0);

    let risk_assessment = assess_risk(
        leverage,
        volatility_7d(snapshot, symbol),
        funding_rate,
        analysis.volatility_assessment(),
    );

    Decision {
        symbol: symbol.to_string(),
        action,
        confidence,
        leverage,
        entry_type,
        entry_price: parse_number(&rec["entry_price"]),
        usdt_amount: parse_number(&rec["usdt_amount"]).filter(|v| *v > 0.0),
        reduce_percent: parse_number(&rec["reduce_percent"]).filter(|v| *v > 0.0 && *v <= 100.0),
        reduce_usdt: parse_number(&rec["reduce_usdt"]).filter(|v| *v > 0.0),
        close_percent: parse_number(&rec["close_percent"]).filter(|v| *v > 0.0 && *v <= 100.0),
        stop_loss_price,
        take_profit_prices,
        current_price: last,
        funding_rate_pct: funding_rate * 100.0,
        funding_impact: assess_funding_impact(funding_rate, action),
        risk_assessment,
        risk_level: rec["risk_level"].as_str().unwrap_or("medium").to_string(),
        reason: rec["reason"].as_str().unwrap_or("").to_string(),
        risk_reward: rec["risk_reward_ratio"].as_str().unwrap_or("").to_string(),
        cost_benefit: rec["cost_benefit_analysis"].clone(),
        should_execute: action != TradeAction::Hold && confidence >= cfg.min_confidence,
        timestamp: Utc::now(),
    }
}

/// Defensive numeric parsing: accepts numbers and strings, strips thousands
/// separators, rejects non-finite values.
pub fn parse_number(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Stop-loss / take-profit levels: the model's numbers when present, else a
/// leverage-adjusted default band around `last`. Hold carries none.
fn stop_levels(
    rec: &Value,
    action: TradeAction,
    last: f64,
    leverage: u32,
    cfg: &NormalizerConfig,
) -> (Option<f64>, Vec<f64>) {
    if action == TradeAction::Hold {
        return (None, Vec::new());
    }

    let ai_sl = parse_number(&rec["stop_loss"]);
    let ai_tp = &rec["take_profit"];

    // Risk-only actions re-protect an existing position: the model's prices
    // are authoritative and nothing is synthesized.
    if action.is_risk_only() {
        let tps = match ai_tp {
            Value::Array(items) => items.iter().filter_map(parse_number).collect(),
            v => parse_number(v).into_iter().collect(),
        };
        return (ai_sl, tps);
    }

    let adj_sl = cfg.stop_loss_percent / leverage as f64;
    let adj_tp = cfg.take_profit_percent / leverage as f64;

    // Direction of the resulting exposure: reduce/close actions protect the
    // existing position, whose direction matches the *_long / *_short suffix;
    // open/add follow the action itself.
    let long_side = matches!(
        action,
        TradeAction::Long
            | TradeAction::AddToLong
            | TradeAction::ReduceLong
            | TradeAction::CloseLong
    );

    let stop_loss = ai_sl.or_else(|| {
        Some(if long_side { last * (1.0 - adj_sl) } else { last * (1.0 + adj_sl) })
    });

    let take_profits: Vec<f64> = match ai_tp {
        Value::Array(items) => items.iter().filter_map(parse_number).collect(),
        v => match parse_number(v) {
            Some(tp) => vec![tp],
            None => {
                if long_side {
                    vec![last * (1.0 + adj_tp), last * (1.0 + adj_tp * 2.0)]
                } else {
                    vec![last * (1.0 - adj_tp), last * (1.0 - adj_tp * 2.0)]
                }
            }
        },
    };

    (stop_loss, take_profits)
}

/// Funding sign relative to the decided direction. Below one basis point the
/// rate is noise.
pub fn assess_funding_impact(funding_rate: f64, action: TradeAction) -> FundingImpact {
    if funding_rate.abs() < 0.0001 {
        return FundingImpact::Neutral;
    }

    let long_side = matches!(
        action,
        TradeAction::Long | TradeAction::AddToLong | TradeAction::ReduceLong | TradeAction::CloseLong
    );

    if long_side {
        if funding_rate > 0.0 { FundingImpact::Negative } else { FundingImpact::Positive }
    } else if funding_rate > 0.0 {
        FundingImpact::Positive
    } else {
        FundingImpact::Negative
    }
}

/// First available 7-day volatility across the preferred timeframes.
fn volatility_7d(snapshot: &MarketSnapshot, symbol: &str) -> Option<f64> {
    let sym = snapshot.symbol(symbol)?;
    for tf in ["1h", "4h", "1d"] {
        if let Some(v) = sym.timeframes.get(tf).and_then(|b| b.get("volatility_7d")) {
            return Some(*v);
        }
    }
    None
}

/// Composite risk score: base 5, leverage up to +3, volatility up to +2,
/// funding +1, market-wide volatility +1.5. Capped at 10.
pub fn assess_risk(
    leverage: u32,
    volatility_7d: Option<f64>,
    funding_rate: f64,
    market_volatility: &str,
) -> RiskAssessment {
    let mut score = 5.0;

    let leverage_risk = (leverage as f64 / 10.0 * 3.0).min(3.0);
    score += leverage_risk;

    if let Some(vol) = volatility_7d {
        if vol > 80.0 {
            score += 2.0;
        } else if vol > 50.0 {
            score += 1.0;
        }
    }

    if funding_rate.abs() > 0.001 {
        score += 1.0;
    }

    if market_volatility == "high" {
        score += 1.5;
    }

    RiskAssessment {
        total_risk_score: score.min(10.0),
        leverage_risk,
        volatility_risk: volatility_7d.unwrap_or(0.0),
        funding_rate_risk: funding_rate.abs() * 1000.0,
        market_risk: market_volatility.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::parse::parse_analysis;
    use crate::market_data::snapshot::SymbolSnapshot;
    use crate::types::TickerStats;
    use serde_json::json;

    fn cfg() -> NormalizerConfig {
        NormalizerConfig {
            default_leverage: 3,
            stop_loss_percent: 0.05,
            take_profit_percent: 0.15,
            min_confidence: 60.0,
            default_order_type: "MARKET".into(),
        }
    }

    fn snapshot_with(symbol: &str, last: f64, funding_rate: f64) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::default();
        let mut sym = SymbolSnapshot { symbol: symbol.into(), ..Default::default() };
        sym.ticker = Some(TickerStats { last_price: last, ..Default::default() });
        sym.funding = Some(crate::types::FundingInfo {
            current_rate: Some(crate::types::FundingRatePoint {
                funding_rate,
                funding_time: 0,
            }),
            recent_rates: Vec::new(),
            open_interest: None,
        });
        snapshot.per_symbol.insert(symbol.into(), sym);
        snapshot
    }

    fn analysis_with(rec: Value) -> Analysis {
        let body = json!({
            "market_overview": {"volatility_assessment": "medium"},
            "recommendations": [rec],
        });
        parse_analysis(&body.to_string())
    }

    // ---- action parsing -----------------------------------------------------

    #[test]
    fn action_aliases_and_unknowns() {
        assert_eq!(TradeAction::parse("LONG"), TradeAction::Long);
        assert_eq!(TradeAction::parse("buy"), TradeAction::Long);
        assert_eq!(TradeAction::parse("sell"), TradeAction::Short);
        assert_eq!(TradeAction::parse("close_short"), TradeAction::CloseShort);
        assert_eq!(TradeAction::parse("moon"), TradeAction::Hold);
        assert_eq!(TradeAction::parse(""), TradeAction::Hold);
    }

    #[test]
    fn action_classification_and_sides() {
        assert!(TradeAction::Long.is_open_like());
        assert!(TradeAction::AddToShort.is_open_like());
        assert!(TradeAction::ReduceLong.is_reduce_like());
        assert!(TradeAction::CancelTpSl.is_risk_only());
        assert_eq!(TradeAction::Long.order_side(), Some(OrderSide::Buy));
        assert_eq!(TradeAction::CloseLong.order_side(), Some(OrderSide::Sell));
        assert_eq!(TradeAction::ReduceShort.order_side(), Some(OrderSide::Buy));
        assert_eq!(TradeAction::Hold.order_side(), None);
    }

    // ---- numeric salvage ----------------------------------------------------

    #[test]
    fn parse_number_strips_thousands_separators() {
        assert_eq!(parse_number(&json!("4,150.5")), Some(4150.5));
        assert_eq!(parse_number(&json!(" 29980 ")), Some(29980.0));
        assert_eq!(parse_number(&json!(42)), Some(42.0));
        assert_eq!(parse_number(&json!(null)), None);
        assert_eq!(parse_number(&json!("not a number")), None);
    }

    // ---- symbol matching ----------------------------------------------------

    #[test]
    fn symbol_matching_tolerates_case_and_suffix() {
        let recs = vec![json!({"symbol": "btc"}), json!({"symbol": "ETHUSDT"})];
        assert!(find_recommendation(&recs, "BTCUSDT").is_some());
        assert!(find_recommendation(&recs, "ETHUSDT").is_some());
        assert!(find_recommendation(&recs, "SOLUSDT").is_none());
    }

    // ---- full normalization -------------------------------------------------

    #[test]
    fn long_recommendation_normalizes_with_gate() {
        let analysis = analysis_with(json!({
            "symbol": "BTC", "action": "long", "confidence": 75,
            "order_type": "LIMIT", "entry_price": "29,980",
            "stop_loss": 29700.0, "take_profit": 30600.0,
            "usdt_amount": 100.0, "leverage": 5
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let decisions =
            normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg());

        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert_eq!(d.action, TradeAction::Long);
        assert_eq!(d.entry_type, EntryType::Limit);
        assert_eq!(d.entry_price, Some(29980.0));
        assert_eq!(d.leverage, 5);
        assert_eq!(d.stop_loss_price, Some(29700.0));
        assert_eq!(d.take_profit_prices, vec![30600.0]);
        assert!(d.should_execute);
    }

    #[test]
    fn low_confidence_fails_the_gate() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "long", "confidence": 40, "usdt_amount": 50.0
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let decisions =
            normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg());
        assert!(!decisions[0].should_execute);
    }

    #[test]
    fn hold_never_executes_even_with_high_confidence() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "hold", "confidence": 99
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let decisions =
            normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg());
        assert!(!decisions[0].should_execute);
        assert!(decisions[0].stop_loss_price.is_none());
    }

    #[test]
    fn default_stop_levels_scale_with_leverage() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "long", "confidence": 70,
            "usdt_amount": 100.0, "leverage": 5
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let d = &normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())[0];

        // adj_sl = 0.05 / 5 = 0.01 ; adj_tp = 0.15 / 5 = 0.03
        assert!((d.stop_loss_price.unwrap() - 30000.0 * 0.99).abs() < 1e-6);
        assert!((d.take_profit_prices[0] - 30000.0 * 1.03).abs() < 1e-6);
        assert!((d.take_profit_prices[1] - 30000.0 * 1.06).abs() < 1e-6);
    }

    #[test]
    fn default_stop_levels_mirror_for_shorts() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "short", "confidence": 70,
            "usdt_amount": 100.0, "leverage": 10
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let d = &normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())[0];

        assert!((d.stop_loss_price.unwrap() - 30000.0 * 1.005).abs() < 1e-6);
        assert!((d.take_profit_prices[0] - 30000.0 * 0.985).abs() < 1e-6);
    }

    #[test]
    fn unknown_action_becomes_hold() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "yolo", "confidence": 90
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let d = &normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())[0];
        assert_eq!(d.action, TradeAction::Hold);
        assert!(!d.should_execute);
    }

    #[test]
    fn leverage_is_clamped_and_defaulted() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "long", "confidence": 70, "leverage": 500,
            "usdt_amount": 10.0
        }));
        let snapshot = snapshot_with("BTCUSDT", 30000.0, 0.0);
        let d = &normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())[0];
        assert_eq!(d.leverage, 125);

        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "long", "confidence": 70, "usdt_amount": 10.0
        }));
        let d = &normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())[0];
        assert_eq!(d.leverage, 3);
    }

    #[test]
    fn missing_price_drops_the_recommendation() {
        let analysis = analysis_with(json!({
            "symbol": "BTCUSDT", "action": "long", "confidence": 70
        }));
        let snapshot = MarketSnapshot::default();
        assert!(normalize_decisions(&analysis, &snapshot, &["BTCUSDT".to_string()], &cfg())
            .is_empty());
    }

    // ---- funding impact -----------------------------------------------------

    #[test]
    fn funding_impact_sign_rules() {
        // positive funding costs longs, pays shorts
        assert_eq!(assess_funding_impact(0.0005, TradeAction::Long), FundingImpact::Negative);
        assert_eq!(assess_funding_impact(0.0005, TradeAction::Short), FundingImpact::Positive);
        // negative funding pays longs
        assert_eq!(assess_funding_impact(-0.0005, TradeAction::Long), FundingImpact::Positive);
        assert_eq!(assess_funding_impact(-0.0005, TradeAction::Short), FundingImpact::Negative);
        // below one basis point is noise
        assert_eq!(assess_funding_impact(0.00005, TradeAction::Long), FundingImpact::Neutral);
    }

    // ---- risk score ---------------------------------------------------------

    #[test]
    fn risk_score_components_add_up() {
        // base 5 + leverage 10x -> +3 + vol 85 -> +2 + funding 0.2% -> +1 = 11, capped at 10
        let r = assess_risk(10, Some(85.0), 0.002, "medium");
        assert!((r.total_risk_score - 10.0).abs() < 1e-9);
        assert!((r.leverage_risk - 3.0).abs() < 1e-9);

        // base 5 + leverage 5x -> +1.5, moderate vol -> +1
        let r = assess_risk(5, Some(60.0), 0.0, "medium");
        assert!((r.total_risk_score - 7.5).abs() < 1e-9);

        // market-wide high volatility adds 1.5
        let r = assess_risk(1, None, 0.0, "high");
        assert!((r.total_risk_score - (5.0 + 0.3 + 1.5)).abs() < 1e-9);
    }
}
