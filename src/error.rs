/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Timed out waiting for '{selector}' on {url}")]
    Timeout { url: String, selector: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model service error: {0}")]
    ExternalModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Soft failures are isolated at the smallest unit (one movie, one date,
    /// one embedding) and retried implicitly by a later invocation. Anything
    /// touching the store connection is fatal.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            AppError::HttpClient(_)
                | AppError::Timeout { .. }
                | AppError::Parse(_)
                | AppError::ExternalModel(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
