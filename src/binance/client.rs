// =============================================================================
// Binance USDT-M Futures REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the bot and Binance servers.
//
// Every response is translated to the canonical schema in `crate::types` at
// this boundary; raw exchange field names never leave this module. Errors are
// classified into the §7 taxonomy: connect/timeout/5xx/429 are transient (and
// retried on the 15/30/60/120 s ladder), structured `{code, msg}` bodies are
// business errors and surface unchanged.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::audit::AuditLog;
use crate::binance::filters::{FilterCache, SymbolFilters};
use crate::binance::retry::{with_retry, RetryPolicy};
use crate::config::ExchangeApiConfig;
use crate::error::{BotError, BotResult};
use crate::market_data::candles::Candle;
use crate::types::{
    AccountSummary, FundingRatePoint, OrderBookTop, OrderInfo, OrderSide, PositionInfo,
    TickerStats,
};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;
/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

// ---------------------------------------------------------------------------
// Order request / acknowledgement
// ---------------------------------------------------------------------------

/// Order types the engine places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Parameters for one `createOrder` call. Quantities and prices are raw
/// `f64`s; the client renders them with the symbol's filter precision.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Required for LIMIT orders.
    pub price: Option<f64>,
    /// Required for STOP_MARKET / TAKE_PROFIT_MARKET orders.
    pub stop_price: Option<f64>,
    /// GTC for LIMIT and protective orders.
    pub time_in_force: Option<&'static str>,
    pub reduce_only: bool,
}

/// What the exchange acknowledged for a freshly created or queried order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: u64,
    pub status: String,
    pub avg_price: f64,
    pub executed_qty: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the USDT-margined futures API.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    secret: String,
    base_url: String,
    http: reqwest::Client,
    filters: Arc<FilterCache>,
    retry: RetryPolicy,
    audit: Arc<AuditLog>,
}

impl BinanceFuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: &ExchangeApiConfig, audit: Arc<AuditLog>) -> Self {
        let mut default_headers = HeaderMap::new();
        // The API key header is required for all signed endpoints.
        if let Ok(val) = HeaderValue::from_str(&config.api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        let base_url = if config.testnet { TESTNET_URL } else { MAINNET_URL }.to_string();
        debug!(base_url = %base_url, "BinanceFuturesClient initialised");

        Self {
            secret: config.api_secret.clone(),
            base_url,
            http,
            filters: Arc::new(FilterCache::new()),
            retry: RetryPolicy::network(),
            audit,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Transport + error classification
    // -------------------------------------------------------------------------

    async fn request(&self, method: Method, path: &str, query: &str, signed: bool) -> BotResult<Value> {
        let qs = if signed { self.signed_query(query) } else { query.to_string() };
        let url = if qs.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, qs)
        };

        let resp = self.http.request(method, &url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| BotError::Internal(format!("{path}: invalid JSON body: {e}")));
        }

        // 5xx and 429 are worth retrying; anything else with a structured
        // body is a definitive business answer.
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(BotError::TransientNetwork(format!("{path} returned {status}: {text}")));
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => {
                let code = body["code"].as_i64().unwrap_or(status.as_u16() as i64);
                let message = body["msg"].as_str().unwrap_or(&text).to_string();
                Err(BotError::ExchangeBusiness { code, message })
            }
            Err(_) => Err(BotError::ExchangeBusiness {
                code: status.as_u16() as i64,
                message: text,
            }),
        }
    }

    async fn get_public(&self, path: &str, query: &str) -> BotResult<Value> {
        with_retry(&self.retry, &self.audit, path, || {
            self.request(Method::GET, path, query, false)
        })
        .await
    }

    async fn get_signed(&self, path: &str, query: &str) -> BotResult<Value> {
        with_retry(&self.retry, &self.audit, path, || {
            self.request(Method::GET, path, query, true)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Exchange info / filters
    // -------------------------------------------------------------------------

    /// Quantization filters for `symbol`, fetched once and cached for the
    /// process lifetime.
    #[instrument(skip(self), name = "binance::symbol_filters")]
    pub async fn symbol_filters(&self, symbol: &str) -> BotResult<SymbolFilters> {
        if let Some(f) = self.filters.get(symbol) {
            return Ok(f);
        }

        let body = self.get_public("/fapi/v1/exchangeInfo", "").await?;
        let symbols = body["symbols"]
            .as_array()
            .ok_or_else(|| BotError::Internal("exchangeInfo missing 'symbols'".into()))?;

        for entry in symbols {
            if let Ok(f) = SymbolFilters::from_exchange_info(entry) {
                self.filters.insert(f);
            }
        }

        self.filters
            .get(symbol)
            .ok_or_else(|| BotError::ValidationFailed(format!("unknown symbol {symbol}")))
    }

    // -------------------------------------------------------------------------
    // Account / positions / orders
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/account (signed).
    #[instrument(skip(self), name = "binance::get_account")]
    pub async fn get_account(&self) -> BotResult<AccountSummary> {
        let body = self.get_signed("/fapi/v2/account", "").await?;
        Ok(AccountSummary {
            total_wallet_balance: f64_field(&body, "totalWalletBalance"),
            total_margin_balance: f64_field(&body, "totalMarginBalance"),
            total_unrealized_pnl: f64_field(&body, "totalUnrealizedProfit"),
            available_balance: f64_field(&body, "availableBalance"),
        })
    }

    /// GET /fapi/v2/positionRisk (signed) — only non-zero positions are
    /// returned, already translated to the canonical schema.
    #[instrument(skip(self), name = "binance::get_positions")]
    pub async fn get_positions(&self) -> BotResult<Vec<PositionInfo>> {
        let body = self.get_signed("/fapi/v2/positionRisk", "").await?;
        let raw = body
            .as_array()
            .ok_or_else(|| BotError::Internal("positionRisk response is not an array".into()))?;

        let mut positions = Vec::new();
        for p in raw {
            let amount = f64_field(p, "positionAmt");
            if amount == 0.0 {
                continue;
            }
            let leverage = f64_field(p, "leverage").max(1.0) as u32;
            positions.push(PositionInfo {
                symbol: p["symbol"].as_str().unwrap_or_default().to_string(),
                position_amount: amount,
                entry_price: f64_field(p, "entryPrice"),
                mark_price: f64_field(p, "markPrice"),
                // Binance spells this `unRealizedProfit`.
                unrealized_pnl: f64_field(p, "unRealizedProfit"),
                leverage,
                isolated: p["marginType"].as_str() == Some("isolated")
                    || p["isolated"].as_bool().unwrap_or(false),
            });
        }

        debug!(count = positions.len(), "open positions fetched");
        Ok(positions)
    }

    /// GET /fapi/v1/openOrders (signed). `symbol = None` lists all symbols.
    #[instrument(skip(self), name = "binance::get_open_orders")]
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> BotResult<Vec<OrderInfo>> {
        let query = match symbol {
            Some(s) => format!("symbol={s}"),
            None => String::new(),
        };
        let body = self.get_signed("/fapi/v1/openOrders", &query).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| BotError::Internal("openOrders response is not an array".into()))?;

        let orders = raw.iter().map(order_from_value).collect::<Vec<_>>();
        debug!(count = orders.len(), "open orders fetched");
        Ok(orders)
    }

    /// GET /fapi/v1/order (signed) — query one order by id.
    #[instrument(skip(self), name = "binance::get_order")]
    pub async fn get_order(&self, symbol: &str, order_id: u64) -> BotResult<OrderInfo> {
        let query = format!("symbol={symbol}&orderId={order_id}");
        let body = self.get_signed("/fapi/v1/order", &query).await?;
        Ok(order_from_value(&body))
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/ticker/24hr for one symbol.
    #[instrument(skip(self), name = "binance::get_ticker")]
    pub async fn get_ticker(&self, symbol: &str) -> BotResult<TickerStats> {
        let body = self
            .get_public("/fapi/v1/ticker/24hr", &format!("symbol={symbol}"))
            .await?;
        Ok(TickerStats {
            symbol: symbol.to_string(),
            last_price: f64_field(&body, "lastPrice"),
            price_change_percent: f64_field(&body, "priceChangePercent"),
            high_price: f64_field(&body, "highPrice"),
            low_price: f64_field(&body, "lowPrice"),
            volume: f64_field(&body, "volume"),
            quote_volume: f64_field(&body, "quoteVolume"),
        })
    }

    /// GET /fapi/v1/depth — top-of-book snapshot.
    #[instrument(skip(self), name = "binance::get_order_book")]
    pub async fn get_order_book(&self, symbol: &str, limit: u32) -> BotResult<OrderBookTop> {
        let body = self
            .get_public("/fapi/v1/depth", &format!("symbol={symbol}&limit={limit}"))
            .await?;
        Ok(OrderBookTop {
            bids: levels(&body["bids"]),
            asks: levels(&body["asks"]),
        })
    }

    /// GET /fapi/v1/klines.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> BotResult<Vec<Candle>> {
        let body = self
            .get_public(
                "/fapi/v1/klines",
                &format!("symbol={symbol}&interval={interval}&limit={limit}"),
            )
            .await?;
        let raw = body
            .as_array()
            .ok_or_else(|| BotError::Internal("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            match Candle::from_kline(entry) {
                Ok(c) => candles.push(c),
                Err(e) => warn!(symbol, interval, error = %e, "skipping malformed kline entry"),
            }
        }
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// GET /fapi/v1/fundingRate — recent settlements, newest first.
    #[instrument(skip(self), name = "binance::get_funding_rates")]
    pub async fn get_funding_rates(
        &self,
        symbol: &str,
        limit: u32,
    ) -> BotResult<Vec<FundingRatePoint>> {
        let body = self
            .get_public("/fapi/v1/fundingRate", &format!("symbol={symbol}&limit={limit}"))
            .await?;
        let raw = body
            .as_array()
            .ok_or_else(|| BotError::Internal("fundingRate response is not an array".into()))?;

        let mut rates: Vec<FundingRatePoint> = raw
            .iter()
            .map(|r| FundingRatePoint {
                funding_rate: f64_field(r, "fundingRate"),
                funding_time: r["fundingTime"].as_i64().unwrap_or(0),
            })
            .collect();
        rates.sort_by_key(|r| std::cmp::Reverse(r.funding_time));
        Ok(rates)
    }

    /// GET /fapi/v1/openInterest.
    #[instrument(skip(self), name = "binance::get_open_interest")]
    pub async fn get_open_interest(&self, symbol: &str) -> BotResult<f64> {
        let body = self
            .get_public("/fapi/v1/openInterest", &format!("symbol={symbol}"))
            .await?;
        Ok(f64_field(&body, "openInterest"))
    }

    // -------------------------------------------------------------------------
    // Trading
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/leverage (signed).
    #[instrument(skip(self), name = "binance::set_leverage")]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> BotResult<()> {
        let query = format!("symbol={symbol}&leverage={leverage}");
        with_retry(&self.retry, &self.audit, "/fapi/v1/leverage", || {
            self.request(Method::POST, "/fapi/v1/leverage", &query, true)
        })
        .await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    /// POST /fapi/v1/order (signed) — submit a new order.
    #[instrument(skip(self, req), name = "binance::create_order",
                 fields(symbol = %req.symbol, side = %req.side, order_type = req.order_type.as_str()))]
    pub async fn create_order(&self, req: &OrderRequest) -> BotResult<OrderAck> {
        if req.quantity <= 0.0 {
            return Err(BotError::ValidationFailed(format!(
                "non-positive quantity {} for {}",
                req.quantity, req.symbol
            )));
        }
        if req.order_type == OrderType::Limit && req.price.is_none() {
            return Err(BotError::ValidationFailed(format!(
                "LIMIT order for {} without a price",
                req.symbol
            )));
        }

        let filters = self.symbol_filters(&req.symbol).await?;

        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}",
            req.symbol,
            req.side.as_str(),
            req.order_type.as_str(),
            filters.format_qty(req.quantity),
        );
        if let Some(price) = req.price {
            params.push_str(&format!("&price={}", filters.format_price(price)));
        }
        if let Some(stop) = req.stop_price {
            params.push_str(&format!("&stopPrice={}", filters.format_price(stop)));
        }
        if let Some(tif) = req.time_in_force {
            params.push_str(&format!("&timeInForce={tif}"));
        }
        if req.reduce_only {
            params.push_str("&reduceOnly=true");
        }

        debug!(params = %params, "placing order");
        let body = with_retry(&self.retry, &self.audit, "/fapi/v1/order", || {
            self.request(Method::POST, "/fapi/v1/order", &params, true)
        })
        .await?;

        Ok(OrderAck {
            order_id: body["orderId"].as_u64().unwrap_or(0),
            status: body["status"].as_str().unwrap_or("NEW").to_string(),
            avg_price: f64_field(&body, "avgPrice"),
            executed_qty: f64_field(&body, "executedQty"),
        })
    }

    /// DELETE /fapi/v1/order (signed).
    #[instrument(skip(self), name = "binance::cancel_order")]
    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> BotResult<()> {
        let query = format!("symbol={symbol}&orderId={order_id}");
        with_retry(&self.retry, &self.audit, "/fapi/v1/order:cancel", || {
            self.request(Method::DELETE, "/fapi/v1/order", &query, true)
        })
        .await?;
        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Read a numeric field that Binance may encode as a string or a number.
fn f64_field(v: &Value, key: &str) -> f64 {
    match &v[key] {
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn levels(v: &Value) -> Vec<(f64, f64)> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|lvl| {
                    let pair = lvl.as_array()?;
                    let price: f64 = pair.first()?.as_str()?.parse().ok()?;
                    let qty: f64 = pair.get(1)?.as_str()?.parse().ok()?;
                    Some((price, qty))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn order_from_value(v: &Value) -> OrderInfo {
    OrderInfo {
        order_id: v["orderId"].as_u64().unwrap_or(0),
        symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
        status: v["status"].as_str().unwrap_or_default().to_string(),
        side: v["side"].as_str().unwrap_or_default().to_string(),
        order_type: v["type"].as_str().unwrap_or_default().to_string(),
        time_in_force: v["timeInForce"].as_str().unwrap_or_default().to_string(),
        orig_qty: f64_field(v, "origQty"),
        executed_qty: f64_field(v, "executedQty"),
        price: f64_field(v, "price"),
        stop_price: f64_field(v, "stopPrice"),
        avg_price: f64_field(v, "avgPrice"),
        reduce_only: v["reduceOnly"].as_bool().unwrap_or(false),
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
