mod telegram;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::LatestItem;

pub use telegram::TelegramNotifier;

/// Chat gateway used for both new-post alerts and command replies.
/// Messages are HTML-formatted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<()>;
}

/// Stand-in when no bot token is configured: messages only go to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        tracing::info!(user = %user_id, "{}", text);
        Ok(())
    }
}

pub fn format_new_post(channel_id: &str, item: &LatestItem) -> String {
    format!(
        "New post on <b>{}</b>:\n\n<b>{}</b>\n{}",
        escape_html(channel_id),
        escape_html(&item.title),
        escape_html(&item.link)
    )
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
