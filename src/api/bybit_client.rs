//! Bybit v5 REST client for USDT linear perpetuals.
//!
//! Handles:
//! - Public market data (klines, tickers, order book, instrument filters)
//! - Signed account queries (wallet balance, positions)
//! - Order placement and cancellation

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{Candle, ExchangePosition, OrderSide, PositionSide, SymbolSpec};

use super::gateway::{best_limit_price, ExchangeGateway, MarketData};
use super::types::*;

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const DEMO_URL: &str = "https://api-demo.bybit.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CATEGORY: &str = "linear";
const RATE_LIMIT_CODE: i32 = 10006;

/// Bybit-specific errors.
#[derive(Error, Debug)]
pub enum BybitError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error: {code} - {message}")]
    Api { code: i32, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded")]
    RateLimit,
}

/// Which Bybit deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Mainnet,
    Testnet,
    /// Mainnet demo trading (paper funds, live prices)
    Demo,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Mainnet => MAINNET_URL,
            Environment::Testnet => TESTNET_URL,
            Environment::Demo => DEMO_URL,
        }
    }
}

/// Client credentials and transport settings.
#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub environment: Environment,
    pub recv_window: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            environment: Environment::Mainnet,
            recv_window: 5000,
        }
    }
}

/// Client for the Bybit v5 API.
pub struct BybitClient {
    client: Client,
    config: BybitConfig,
    base_url: String,

    /// Instrument filters, fetched once per symbol
    specs: RwLock<HashMap<String, SymbolSpec>>,
}

impl BybitClient {
    /// Create a new client for the configured environment.
    pub fn new(config: BybitConfig) -> Result<Self> {
        let base_url = config.environment.base_url().to_string();
        Self::with_base_url(config, base_url)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(config: BybitConfig, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            config,
            base_url,
            specs: RwLock::new(HashMap::new()),
        })
    }

    /// HMAC-SHA256 of `timestamp + api_key + recv_window + payload`, hex encoded.
    fn sign(&self, timestamp: &str, payload: &str) -> Result<String, BybitError> {
        let (api_key, secret) = self.credentials()?;

        let sign_str = format!("{}{}{}{}", timestamp, api_key, self.config.recv_window, payload);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| BybitError::Auth(e.to_string()))?;
        mac.update(sign_str.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn credentials(&self) -> Result<(&str, &str), BybitError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| BybitError::Auth("API key not configured".to_string()))?;
        let secret = self
            .config
            .api_secret
            .as_deref()
            .ok_or_else(|| BybitError::Auth("API secret not configured".to_string()))?;
        Ok((api_key, secret))
    }

    fn auth_headers(&self, payload: &str) -> Result<reqwest::header::HeaderMap, BybitError> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let (api_key, _) = self.credentials()?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, payload)?;

        let value = |s: &str| HeaderValue::from_str(s).map_err(|e| BybitError::Auth(e.to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-bapi-api-key", value(api_key)?);
        headers.insert("x-bapi-timestamp", value(&timestamp)?);
        headers.insert("x-bapi-sign", value(&signature)?);
        headers.insert("x-bapi-recv-window", value(&self.config.recv_window.to_string())?);
        Ok(headers)
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, BybitError> {
        let url = format!("{}{}?{}", self.base_url, endpoint, query_string(params));
        debug!(url = %url, "Bybit public request");

        let response = self.client.get(&url).send().await?;
        unwrap_response(response).await
    }

    async fn get_private<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, BybitError> {
        let query = query_string(params);
        let url = format!("{}{}?{}", self.base_url, endpoint, query);
        debug!(url = %url, "Bybit private request");

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers(&query)?)
            .send()
            .await?;
        unwrap_response(response).await
    }

    async fn post_private<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, BybitError> {
        let body = serde_json::to_string(body).map_err(|e| BybitError::Parse(e.to_string()))?;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, body = %body, "Bybit order request");

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers(&body)?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        unwrap_response(response).await
    }

    async fn submit_order(&self, request: CreateOrderRequest) -> Result<CreateOrderResult, BybitError> {
        self.post_private("/v5/order/create", &request).await
    }

    /// Fetch the raw position record for `symbol`.
    async fn position_info(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let result: PositionListResult = self
            .get_private(
                "/v5/position/list",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await
            .context("Failed to fetch position")?;
        Ok(result.list.into_iter().next())
    }

    fn order_request(side: OrderSide, qty: Decimal, symbol: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            category: CATEGORY.to_string(),
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            order_type: "Market".to_string(),
            qty: qty.normalize().to_string(),
            price: None,
            time_in_force: None,
            reduce_only: None,
            order_link_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl MarketData for BybitClient {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let result: KlineResult = self
            .get_public(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
            .context("Failed to fetch klines")?;

        let mut candles = result
            .list
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<Result<Vec<_>, _>>()?;

        // Bybit returns newest first
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        let result: TickersResult = self
            .get_public(
                "/v5/market/tickers",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await
            .context("Failed to fetch ticker")?;

        let ticker = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| BybitError::Parse(format!("No ticker for {}", symbol)))?;
        Ok(ticker.last_price)
    }

    async fn get_best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        let book: OrderbookResult = self
            .get_public(
                "/v5/market/orderbook",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await
            .context("Failed to fetch order book")?;

        let bid = top_of_book(&book.b).ok_or_else(|| BybitError::Parse("Empty bid side".to_string()))?;
        let ask = top_of_book(&book.a).ok_or_else(|| BybitError::Parse("Empty ask side".to_string()))?;
        Ok((bid, ask))
    }

    async fn get_symbol_spec(&self, symbol: &str) -> Result<SymbolSpec> {
        if let Some(spec) = self.specs.read().await.get(symbol) {
            return Ok(*spec);
        }

        let result: InstrumentsResult = self
            .get_public(
                "/v5/market/instruments-info",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await
            .context("Failed to fetch instrument info")?;

        let info = result
            .list
            .into_iter()
            .find(|i| i.symbol == symbol)
            .ok_or_else(|| BybitError::Parse(format!("Unknown symbol {}", symbol)))?;

        let spec = SymbolSpec {
            min_qty: info.lot_size_filter.min_order_qty,
            qty_step: info.lot_size_filter.qty_step,
            tick_size: info.price_filter.tick_size,
        };

        info!(symbol = %symbol, min_qty = %spec.min_qty, qty_step = %spec.qty_step, tick_size = %spec.tick_size, "Loaded instrument filters");
        self.specs.write().await.insert(symbol.to_string(), spec);
        Ok(spec)
    }
}

#[async_trait]
impl ExchangeGateway for BybitClient {
    async fn get_balance(&self) -> Result<Decimal> {
        let result: WalletBalanceResult = self
            .get_private(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string()), ("coin", "USDT".to_string())],
            )
            .await
            .context("Failed to fetch wallet balance")?;

        let coin = result
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|c| c.coin == "USDT")
            .ok_or_else(|| BybitError::Parse("No USDT balance in wallet".to_string()))?;

        Ok(parse_decimal(&coin.equity)?)
    }

    async fn get_position(&self, symbol: &str) -> Result<ExchangePosition> {
        let Some(info) = self.position_info(symbol).await? else {
            return Ok(ExchangePosition::flat());
        };

        let size = parse_decimal(&info.size)?;
        let side = OrderSide::parse(&info.side).map(PositionSide::from_order_side);
        if size.is_zero() || side.is_none() {
            return Ok(ExchangePosition::flat());
        }

        Ok(ExchangePosition { size, side })
    }

    async fn get_avg_entry_price(&self, symbol: &str) -> Result<Decimal> {
        match self.position_info(symbol).await? {
            Some(info) => Ok(parse_decimal(&info.avg_price)?),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn get_unrealized_pnl(&self, symbol: &str) -> Result<Decimal> {
        match self.position_info(symbol).await? {
            Some(info) => Ok(parse_decimal(&info.unrealised_pnl)?),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn place_limit_best(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<bool> {
        let spec = self.get_symbol_spec(symbol).await?;
        let (bid, ask) = self.get_best_bid_ask(symbol).await?;
        let price = best_limit_price(side, bid, ask, &spec);

        let request = CreateOrderRequest {
            order_type: "Limit".to_string(),
            price: Some(price.normalize().to_string()),
            time_in_force: Some("GTC".to_string()),
            ..Self::order_request(side, qty, symbol)
        };

        match self.submit_order(request).await {
            Ok(result) => {
                info!(side = %side, qty = %qty, price = %price, order_id = %result.order_id, "Limit order placed");
                Ok(true)
            }
            Err(BybitError::Api { code, message }) => {
                warn!(side = %side, qty = %qty, price = %price, code, message = %message, "Limit order rejected");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to place limit order"),
        }
    }

    async fn place_market(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<()> {
        let result = self
            .submit_order(Self::order_request(side, qty, symbol))
            .await
            .context("Failed to place market order")?;
        info!(side = %side, qty = %qty, order_id = %result.order_id, "Market order placed");
        Ok(())
    }

    async fn close_position(&self, symbol: &str) -> Result<()> {
        let position = self.get_position(symbol).await?;
        let Some(side) = position.side else {
            debug!(symbol = %symbol, "No position to close");
            return Ok(());
        };

        let request = CreateOrderRequest {
            reduce_only: Some(true),
            ..Self::order_request(side.closing_side(), position.size, symbol)
        };
        let result = self
            .submit_order(request)
            .await
            .context("Failed to close position")?;

        info!(side = %side, size = %position.size, order_id = %result.order_id, "Position closed");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let request = CancelAllRequest {
            category: CATEGORY.to_string(),
            symbol: symbol.to_string(),
        };
        let result: CancelAllResult = self
            .post_private("/v5/order/cancel-all", &request)
            .await
            .context("Failed to cancel orders")?;

        debug!(symbol = %symbol, cancelled = result.list.len(), "Open orders cancelled");
        Ok(())
    }
}

/// Check HTTP status and the retCode envelope, returning the result payload.
async fn unwrap_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BybitError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BybitError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: ApiResponse<T> = response.json().await?;
    if envelope.ret_code != 0 {
        if envelope.ret_code == RATE_LIMIT_CODE {
            return Err(BybitError::RateLimit);
        }
        return Err(BybitError::Api {
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }

    envelope
        .result
        .ok_or_else(|| BybitError::Parse("Empty result".to_string()))
}

fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Bybit numeric string; empty means zero.
fn parse_decimal(s: &str) -> Result<Decimal, BybitError> {
    if s.is_empty() {
        return Ok(Decimal::ZERO);
    }
    s.parse()
        .map_err(|e| BybitError::Parse(format!("invalid number '{}': {}", s, e)))
}

fn parse_kline_row(row: &[String]) -> Result<Candle, BybitError> {
    if row.len() < 6 {
        return Err(BybitError::Parse(format!("kline row has {} fields", row.len())));
    }

    let ms: i64 = row[0]
        .parse()
        .map_err(|_| BybitError::Parse(format!("invalid kline timestamp '{}'", row[0])))?;
    let open_time = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BybitError::Parse(format!("kline timestamp out of range: {}", ms)))?;

    Ok(Candle {
        open_time,
        open: parse_decimal(&row[1])?,
        high: parse_decimal(&row[2])?,
        low: parse_decimal(&row[3])?,
        close: parse_decimal(&row[4])?,
        volume: parse_decimal(&row[5])?,
        turnover: row.get(6).map(|s| parse_decimal(s)).transpose()?.unwrap_or_default(),
    })
}

fn top_of_book(levels: &[Vec<String>]) -> Option<Decimal> {
    levels.first().and_then(|level| level.first()).and_then(|p| p.parse().ok())
}
