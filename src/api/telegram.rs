//! Telegram Bot API client: operator notifications and command polling.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use super::gateway::Notifier;
use super::types::{TelegramResponse, Update};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll window for getUpdates.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Api(String),
}

/// Operator command sent from the reply keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `/start`: show the keyboard
    Menu,
    StartTrading,
    StopTrading,
    Balance,
    Pnl,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "/start" => Some(Command::Menu),
            "Start_trading" => Some(Command::StartTrading),
            "Stop_trading" => Some(Command::StopTrading),
            "Balance" => Some(Command::Balance),
            "PnL" => Some(Command::Pnl),
            _ => None,
        }
    }
}

/// Client bound to a single bot token and operator chat.
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
    chat_id: i64,
}

impl TelegramClient {
    pub fn new(token: String, chat_id: i64) -> Result<Self> {
        Self::with_base_url(token, chat_id, TELEGRAM_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(token: String, chat_id: i64, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token,
            chat_id,
        })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Send `text` to the operator chat with the command keyboard attached.
    pub async fn send_message(&self, text: &str) -> Result<(), TelegramError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "reply_markup": {
                "keyboard": [
                    [{"text": "Start_trading"}, {"text": "Stop_trading"}],
                    [{"text": "Balance"}, {"text": "PnL"}]
                ],
                "resize_keyboard": true
            }
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let _: serde_json::Value = unwrap_response(response).await?;
        debug!(chat_id = self.chat_id, "Telegram message sent");
        Ok(())
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await?;

        unwrap_response(response).await
    }
}

async fn unwrap_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TelegramError> {
    let envelope: TelegramResponse<T> = response.json().await?;
    if !envelope.ok {
        return Err(TelegramError::Api(
            envelope.description.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    envelope
        .result
        .ok_or_else(|| TelegramError::Api("missing result".to_string()))
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, text: &str) -> Result<()> {
        self.send_message(text)
            .await
            .context("Failed to send Telegram message")
    }
}

/// Notifier that only writes to the log, used when Telegram is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!(message = %text, "Operator notice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start"), Some(Command::Menu));
        assert_eq!(Command::parse("Start_trading"), Some(Command::StartTrading));
        assert_eq!(Command::parse(" Stop_trading\n"), Some(Command::StopTrading));
        assert_eq!(Command::parse("Balance"), Some(Command::Balance));
        assert_eq!(Command::parse("PnL"), Some(Command::Pnl));
        assert_eq!(Command::parse("pnl"), None);
        assert_eq!(Command::parse("hello"), None);
    }

    #[tokio::test]
    async fn test_send_message_with_keyboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_string_contains("\"chat_id\":42"))
            .and(body_string_contains("Start_trading"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url("TOKEN".to_string(), 42, server.uri()).unwrap();
        assert_ok!(client.send("hello").await);
    }

    #[tokio::test]
    async fn test_api_error_surfaces_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}),
            ))
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url("TOKEN".to_string(), 42, server.uri()).unwrap();
        let err = client.send_message("hello").await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_get_updates_uses_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/botTOKEN/getUpdates"))
            .and(query_param("offset", "8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": [
                {"update_id": 8, "message": {"message_id": 3, "chat": {"id": 42}, "text": "PnL"}}
            ]})))
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url("TOKEN".to_string(), 42, server.uri()).unwrap();
        let updates = client.get_updates(8).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 8);
    }
}
