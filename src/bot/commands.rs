use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::app::App;
use crate::error::{AppError, Result};
use crate::models::Outcome;
use crate::notify::escape_html;

use super::handler::{BotCommand, HELP};

/// Runs a command for `user_id` and returns the HTML reply. User errors are
/// reported in the reply; infrastructure errors are logged and answered
/// with a generic message.
pub async fn respond(app: &App, user_id: &str, command: BotCommand) -> String {
    match execute(app, user_id, command).await {
        Ok(reply) => reply,
        Err(e) if e.is_user_error() => escape_html(&capitalize(&e.to_string())),
        Err(e) => {
            tracing::error!("Command for {} failed: {}", user_id, e);
            "Something went wrong, please try again later.".to_string()
        }
    }
}

async fn execute(app: &App, user_id: &str, command: BotCommand) -> Result<String> {
    let reply = match command {
        BotCommand::Help => HELP.to_string(),

        BotCommand::Usage(usage) => format!("Usage: {}", usage),

        BotCommand::Subscribe(channel) => match app.subscribe(user_id, &channel).await {
            Ok((channel, Outcome::FetchError)) => format!(
                "Subscribed to <b>{}</b>, but it could not be fetched right now. I will keep trying.",
                escape_html(&channel)
            ),
            Ok((channel, _)) => format!("Subscribed to <b>{}</b>.", escape_html(&channel)),
            Err(AppError::AlreadySubscribed(channel)) => {
                format!("You are already subscribed to <b>{}</b>.", escape_html(&channel))
            }
            Err(e) => return Err(e),
        },

        BotCommand::Unsubscribe(channel) => {
            let channel = app.unsubscribe(user_id, &channel).await?;
            format!("Unsubscribed from <b>{}</b>.", escape_html(&channel))
        }

        BotCommand::List => {
            let subs = app.list(user_id).await?;
            if subs.is_empty() {
                "You are not subscribed to anything.".to_string()
            } else {
                let mut reply = "Your subscriptions:".to_string();
                for sub in subs {
                    let _ = write!(
                        reply,
                        "\n- {} (every {}h)",
                        escape_html(&sub.channel_id),
                        sub.config.interval_hours
                    );
                }
                reply
            }
        }

        BotCommand::SetInterval { channel, hours } => {
            let outcome = app.set_interval(user_id, &channel, hours).await?;
            format!(
                "<b>{}</b> will be checked every {}h. Checked now: {}.",
                escape_html(channel.trim()),
                hours,
                outcome.describe()
            )
        }

        BotCommand::Check(channel) => match app.check(user_id, &channel).await? {
            Outcome::NotSubscribed => {
                return Err(AppError::NotSubscribed(channel));
            }
            outcome => format!("<b>{}</b>: {}.", escape_html(&channel), outcome.describe()),
        },

        BotCommand::CheckAll => {
            let outcomes = app.check_all(user_id).await?;
            if outcomes.is_empty() {
                "You are not subscribed to anything.".to_string()
            } else {
                let mut reply = "Checked:".to_string();
                for (channel, outcome) in outcomes {
                    let _ = write!(
                        reply,
                        "\n- {}: {}",
                        escape_html(&channel),
                        outcome.describe()
                    );
                }
                reply
            }
        }

        BotCommand::Reset(channel) => {
            if app.reset(user_id, &channel).await? {
                format!(
                    "The latest post of <b>{}</b> will be sent again on the next check.",
                    escape_html(&channel)
                )
            } else {
                format!("Nothing to reset for <b>{}</b>.", escape_html(&channel))
            }
        }

        BotCommand::ResetAll => {
            let count = app.reset_all(user_id).await?;
            format!("Reset {} channel(s).", count)
        }

        BotCommand::Debug => {
            let statuses = app.status(user_id).await?;
            if statuses.is_empty() {
                "You are not subscribed to anything.".to_string()
            } else {
                let mut reply = format!("Now: {}", format_time(Some(app.now())));
                for status in statuses {
                    let _ = write!(
                        reply,
                        "\n\n<b>{}</b>\ninterval: {}h\nlast check: {}\nnext check: {}",
                        escape_html(&status.channel_id),
                        status.config.interval_hours,
                        format_time(status.config.last_check_at),
                        format_time(Some(status.due_at)),
                    );
                    match status.last_notified {
                        Some(record) => {
                            let _ = write!(
                                reply,
                                "\nlast post: {}\n{}",
                                format_time(Some(record.published_at)),
                                escape_html(&record.link)
                            );
                        }
                        None => reply.push_str("\nlast post: none"),
                    }
                }
                reply
            }
        }
    };

    Ok(reply)
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "never".to_string(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
