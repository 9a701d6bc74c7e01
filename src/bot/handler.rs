#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Help,
    Subscribe(String),
    Unsubscribe(String),
    List,
    SetInterval { channel: String, hours: i64 },
    Check(String),
    CheckAll,
    Reset(String),
    ResetAll,
    Debug,
    /// Recognised command with missing or malformed arguments.
    Usage(&'static str),
}

pub const HELP: &str = "I send you a message whenever a channel you follow publishes a new post.\n\n\
Commands:\n\
/subscribe &lt;channel&gt; - follow a channel\n\
/unsubscribe &lt;channel&gt; - stop following\n\
/list - your subscriptions\n\
/setinterval &lt;channel&gt; &lt;hours&gt; - how often to check\n\
/check &lt;channel&gt; - check now\n\
/checkall - check every channel now\n\
/reset &lt;channel&gt; - resend the latest post on the next check\n\
/resetall - same, for every channel\n\
/debug - scheduling details\n\
/help - this message";

/// Parses a chat message. `/start`, unknown commands and plain text map to
/// help; `/cmd@botname` addressing is accepted.
pub fn parse_command(text: &str) -> BotCommand {
    let mut words = text.split_whitespace();
    let Some(head) = words.next().and_then(|w| w.strip_prefix('/')) else {
        return BotCommand::Help;
    };
    let name = head.split('@').next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = words.collect();

    match (name.as_str(), args.as_slice()) {
        ("subscribe", [channel, ..]) => BotCommand::Subscribe(channel.to_string()),
        ("subscribe", []) => BotCommand::Usage("/subscribe &lt;channel&gt;"),

        ("unsubscribe", [channel, ..]) => BotCommand::Unsubscribe(channel.to_string()),
        ("unsubscribe", []) => BotCommand::Usage("/unsubscribe &lt;channel&gt;"),

        ("list", _) => BotCommand::List,

        ("setinterval", [channel, hours, ..]) => match hours.parse::<i64>() {
            Ok(hours) => BotCommand::SetInterval {
                channel: channel.to_string(),
                hours,
            },
            Err(_) => BotCommand::Usage("/setinterval &lt;channel&gt; &lt;hours&gt; (whole hours)"),
        },
        ("setinterval", _) => BotCommand::Usage("/setinterval &lt;channel&gt; &lt;hours&gt;"),

        ("check", [channel, ..]) => BotCommand::Check(channel.to_string()),
        ("check", []) => BotCommand::Usage("/check &lt;channel&gt;"),
        ("checkall", _) => BotCommand::CheckAll,

        ("reset", [channel, ..]) => BotCommand::Reset(channel.to_string()),
        ("reset", []) => BotCommand::Usage("/reset &lt;channel&gt;"),
        ("resetall", _) => BotCommand::ResetAll,

        ("debug", _) => BotCommand::Debug,

        _ => BotCommand::Help,
    }
}
