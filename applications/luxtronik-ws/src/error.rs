use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("Authentication failed: {0}")]
    InvalidAuth(String),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("Poll cycle timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("XML error: {0}")]
    Xml(#[from] xmltree::ParseError),
    #[error("Layout error: {0}")]
    Layout(String),
    #[error("Value error: {0}")]
    Value(String),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse classification shown to whoever configures the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    CannotConnect,
    InvalidAuth,
    Unknown,
}

impl SetupError {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupError::CannotConnect => "cannot_connect",
            SetupError::InvalidAuth => "invalid_auth",
            SetupError::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Errors the scheduler may retry on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_) | AppError::Connect(_) | AppError::Closed(_) | AppError::Io(_)
        )
    }

    pub fn setup_error(&self) -> SetupError {
        match self {
            AppError::Connect(_) | AppError::Io(_) => SetupError::CannotConnect,
            AppError::InvalidAuth(_) | AppError::UnexpectedResponse(_) | AppError::Closed(_) => {
                SetupError::InvalidAuth
            }
            _ => SetupError::Unknown,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                AppError::Closed("websocket closed".into())
            }
            WsError::Io(io) => AppError::Connect(io.to_string()),
            other => AppError::Connect(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_is_transient() {
        let err = AppError::Timeout(Duration::from_secs(10));
        assert!(err.is_transient());
        assert_eq!(err.setup_error(), SetupError::Unknown);
    }

    #[test]
    fn test_setup_error_classification() {
        assert_eq!(
            AppError::Connect("refused".into()).setup_error(),
            SetupError::CannotConnect
        );
        assert_eq!(
            AppError::InvalidAuth("short".into()).setup_error(),
            SetupError::InvalidAuth
        );
        assert_eq!(
            AppError::UnexpectedResponse("<Foo/>".into()).setup_error(),
            SetupError::InvalidAuth
        );
        assert_eq!(
            AppError::Layout("missing".into()).setup_error(),
            SetupError::Unknown
        );
        assert!(!AppError::InvalidAuth("x".into()).is_transient());
    }
}
