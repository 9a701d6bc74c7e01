use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Errors caused by what the user asked for, as opposed to infrastructure
    /// failures. These are reported back verbatim.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AppError::NotSubscribed(_)
                | AppError::AlreadySubscribed(_)
                | AppError::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_classified() {
        assert!(AppError::NotSubscribed("alpha".into()).is_user_error());
        assert!(AppError::InvalidArgument("hours".into()).is_user_error());
        assert!(!AppError::Fetch("timeout".into()).is_user_error());
        assert!(!AppError::Config("bad".into()).is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::NotSubscribed("alpha".to_string());
        assert_eq!(err.to_string(), "not subscribed to alpha");
        let err = AppError::InvalidArgument("interval must be at least 1 hour".to_string());
        assert_eq!(
            err.to_string(),
            "invalid argument: interval must be at least 1 hour"
        );
    }
}
