use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::app::App;
use crate::error::Result;

use super::commands::respond;
use super::handler::parse_command;

/// The subset of a Telegram update the bot reacts to.
#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone)]
struct WebhookState {
    app: Arc<App>,
    secret: Arc<str>,
}

pub fn router(app: Arc<App>, secret: &str) -> Router {
    let state = WebhookState {
        app,
        secret: Arc::from(secret),
    };

    Router::new()
        .route("/health", get(health))
        .route("/webhook/:secret", post(receive))
        .with_state(state)
}

/// Serves `router` until `stop` changes.
pub async fn serve(listener: TcpListener, router: Router, mut stop: watch::Receiver<bool>) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn receive(
    State(state): State<WebhookState>,
    Path(secret): Path<String>,
    Json(update): Json<Update>,
) -> StatusCode {
    if secret.as_str() != &*state.secret {
        return StatusCode::NOT_FOUND;
    }

    // Non-text updates (stickers, edits, joins) are acknowledged and ignored.
    let Some(message) = update.message else {
        return StatusCode::OK;
    };
    let Some(text) = message.text else {
        return StatusCode::OK;
    };

    // Answer right away: a slow reply makes Telegram redeliver the update,
    // which would run the command twice.
    let app = state.app.clone();
    let user_id = message.chat.id.to_string();
    tokio::spawn(async move {
        let reply = respond(&app, &user_id, parse_command(&text)).await;
        if let Err(e) = app.notifier().send(&user_id, &reply).await {
            tracing::warn!("Failed to reply to {}: {}", user_id, e);
        }
    });

    StatusCode::OK
}
