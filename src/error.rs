use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error(
        "Attempting to publish artifact outside of build artifacts directory. Specified target path: \"{path}\""
    )]
    PathEscape { path: String },

    #[error("{}", transient_message(*status, message))]
    TransientTransfer {
        status: Option<u16>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthOrExpiredToken(String),

    #[error("{}", violation_message(*status, message, body))]
    ProtocolViolation {
        status: Option<u16>,
        message: String,
        body: String,
    },

    #[error("Unable to publish artifact {artifact}: retry budget exhausted, last error: {last_error}")]
    BackoffExhausted { artifact: String, last_error: String },

    #[error("IO Error: {0}")]
    Io(String),
}

fn transient_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("{message} (HTTP {status})"),
        None => format!("Network Error: {message}"),
    }
}

fn violation_message(status: Option<u16>, message: &str, body: &str) -> String {
    let mut text = match status {
        Some(status) => format!("{message} (HTTP {status})"),
        None => message.to_string(),
    };
    if !body.is_empty() {
        text.push_str(", body: ");
        text.push_str(body);
    }
    text
}

impl PublishError {
    pub fn protocol(message: impl Into<String>) -> Self {
        PublishError::ProtocolViolation {
            status: None,
            message: message.into(),
            body: String::new(),
        }
    }

    pub fn unexpected_status(message: impl Into<String>, status: u16, body: String) -> Self {
        PublishError::ProtocolViolation {
            status: Some(status),
            message: message.into(),
            body,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::TransientTransfer { .. } | PublishError::AuthOrExpiredToken(_)
        )
    }

    /// A transient failure that carries no HTTP status happened below the
    /// protocol, so any server-side session it touched is suspect.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, PublishError::TransientTransfer { status: None, .. })
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PublishError::TransientTransfer {
                status: None,
                message: format!("Connection timed out: {err}"),
            }
        } else if err.is_connect() {
            PublishError::TransientTransfer {
                status: None,
                message: format!("Cannot connect: {err}"),
            }
        } else if err.is_builder() {
            // The request never left the client.
            PublishError::protocol(format!("Invalid request: {err}"))
        } else if let Some(status) = err.status() {
            PublishError::TransientTransfer {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            PublishError::TransientTransfer {
                status: None,
                message: format!("Request failed: {err}"),
            }
        }
    }
}
