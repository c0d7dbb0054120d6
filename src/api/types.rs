//! Response types for the Bybit v5 REST API and the Telegram Bot API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== Bybit ====================

/// Envelope wrapping every Bybit v5 response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i32,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

/// Result of /v5/market/instruments-info.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsResult {
    #[serde(default)]
    pub list: Vec<InstrumentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    pub lot_size_filter: LotSizeFilter,
    pub price_filter: PriceFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub min_order_qty: Decimal,
    pub qty_step: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub tick_size: Decimal,
}

/// Result of /v5/market/kline. Rows are newest first:
/// `[startTime, open, high, low, close, volume, turnover]`.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

/// Result of /v5/market/tickers.
#[derive(Debug, Clone, Deserialize)]
pub struct TickersResult {
    #[serde(default)]
    pub list: Vec<TickerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerInfo {
    pub symbol: String,
    pub last_price: Decimal,
    #[serde(default)]
    pub bid1_price: String,
    #[serde(default)]
    pub ask1_price: String,
}

/// Result of /v5/market/orderbook. Levels are `[price, size]`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookResult {
    pub s: String,
    #[serde(default)]
    pub b: Vec<Vec<String>>,
    #[serde(default)]
    pub a: Vec<Vec<String>>,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub u: i64,
}

/// Result of /v5/account/wallet-balance.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalanceResult {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub coin: String,
    /// Bybit sends "" for unset numeric fields, so these stay strings
    #[serde(default)]
    pub equity: String,
    #[serde(default)]
    pub wallet_balance: String,
}

/// Result of /v5/position/list.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionListResult {
    #[serde(default)]
    pub list: Vec<PositionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// "Buy", "Sell" or "" when flat
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub unrealised_pnl: String,
}

/// Body of /v5/order/create.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    pub order_link_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResult {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

/// Body of /v5/order/cancel-all.
#[derive(Debug, Clone, Serialize)]
pub struct CancelAllRequest {
    pub category: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAllResult {
    #[serde(default)]
    pub list: Vec<CreateOrderResult>,
}

// ==================== Telegram ====================

/// Envelope wrapping every Telegram Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_instruments_parse() {
        let body = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "list": [{
                    "symbol": "BTCUSDT",
                    "status": "Trading",
                    "lotSizeFilter": {"maxOrderQty": "100", "minOrderQty": "0.001", "qtyStep": "0.001"},
                    "priceFilter": {"minPrice": "0.10", "maxPrice": "199999.80", "tickSize": "0.10"}
                }]
            }
        }"#;

        let resp: ApiResponse<InstrumentsResult> = serde_json::from_str(body).unwrap();
        let info = &resp.result.unwrap().list[0];
        assert_eq!(info.lot_size_filter.min_order_qty, dec!(0.001));
        assert_eq!(info.price_filter.tick_size, dec!(0.1));
    }

    #[test]
    fn test_error_envelope_without_result() {
        let body = r#"{"retCode": 10006, "retMsg": "Too many visits!", "result": {}}"#;
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert_eq!(resp.ret_code, 10006);

        let body = r#"{"retCode": 10001, "retMsg": "params error"}"#;
        let resp: ApiResponse<PositionListResult> = serde_json::from_str(body).unwrap();
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_flat_position_parse() {
        let body = r#"{
            "retCode": 0, "retMsg": "OK",
            "result": {"list": [{"symbol": "BTCUSDT", "side": "", "size": "0", "avgPrice": "0", "unrealisedPnl": ""}]}
        }"#;
        let resp: ApiResponse<PositionListResult> = serde_json::from_str(body).unwrap();
        let pos = &resp.result.unwrap().list[0];
        assert_eq!(pos.side, "");
        assert_eq!(pos.unrealised_pnl, "");
    }

    #[test]
    fn test_order_request_serialization() {
        let req = CreateOrderRequest {
            category: "linear".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: "Sell".to_string(),
            order_type: "Market".to_string(),
            qty: "0.003".to_string(),
            price: None,
            time_in_force: None,
            reduce_only: Some(true),
            order_link_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["orderType"], "Market");
        assert_eq!(json["reduceOnly"], true);
        assert!(json.get("price").is_none());
    }

    #[test]
    fn test_telegram_updates_parse() {
        let body = r#"{"ok": true, "result": [
            {"update_id": 7, "message": {"message_id": 1, "chat": {"id": 42, "type": "private"}, "text": "Balance"}},
            {"update_id": 8, "edited_message": {"message_id": 1, "chat": {"id": 42}}}
        ]}"#;
        let resp: TelegramResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let updates = resp.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("Balance"));
        assert!(updates[1].message.is_none());
    }
}
