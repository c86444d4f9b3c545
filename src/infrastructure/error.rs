use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error("Remote store returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Remote store requires an authenticated session")]
    Unauthenticated,
    #[error("Operation not supported by the active store: {0}")]
    Unsupported(String),
}

impl InfraError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(InfraError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(InfraError::Remote("network error while listing todos".to_string()).is_transient());
        assert!(!InfraError::Http {
            status: 409,
            body: "duplicate key".to_string()
        }
        .is_transient());
        assert!(!InfraError::Unauthenticated.is_transient());
    }
}
