use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::Notifier;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: user_id,
            text,
            parse_mode: "HTML",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Delivery(e.without_url().to_string()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Delivery(format!("HTTP {}: {}", status, e.without_url())))?;

        if body.ok {
            Ok(())
        } else {
            Err(AppError::Delivery(
                body.description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "42",
                "text": "<b>hi</b>",
                "parse_mode": "HTML"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"message_id": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(&server.uri(), "TOKEN").unwrap();
        notifier.send("42", "<b>hi</b>").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(&server.uri(), "TOKEN").unwrap();
        let err = notifier.send("42", "hello").await.unwrap_err();
        match err {
            AppError::Delivery(message) => assert!(message.contains("blocked")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
