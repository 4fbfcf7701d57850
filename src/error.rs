#[derive(Debug, thiserror::Error)]
pub enum MtgvError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl MtgvError {
    /// Render the error as the short message shown inline next to the form.
    ///
    /// Validation and backend messages are passed through as written; lower
    /// level failures collapse to a generic sentence with the cause appended.
    pub fn user_message(&self) -> String {
        match self {
            MtgvError::InvalidArgument(msg) | MtgvError::NotFound(msg) => msg.clone(),
            MtgvError::Backend { message, .. } if !message.is_empty() => message.clone(),
            MtgvError::Backend { status, .. } => format!("Request failed with status {status}"),
            MtgvError::Http(e) if e.is_timeout() => "The server took too long to respond".into(),
            MtgvError::Http(e) => format!("Could not reach the server: {e}"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MtgvError>;
