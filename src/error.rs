pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability unavailable: {0}")]
    Capability(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend rejected request ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session is not accepting this action: {0}")]
    SessionClosed(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

}

impl Error {
    /// Whether repeating the same request later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::Backend { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Error::Io(_) | Error::Storage(_) => true,
            _ => false,
        }
    }

    /// Text shown to the student when a submission attempt fails.
    pub fn student_message(&self) -> String {
        match self {
            Error::Http(_) => {
                "Could not reach the exam server. Check your connection and try submitting again."
                    .to_string()
            }
            Error::Backend { status, message } if *status < 500 => message.clone(),
            Error::Backend { .. } => {
                "The exam server is having trouble. Please try submitting again.".to_string()
            }
            Error::SessionClosed(msg) => msg.clone(),
            _ => "Submission failed. Please try again.".to_string(),
        }
    }
}
