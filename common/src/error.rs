use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no tables found from either vector search or database")]
    NoTablesFound,

    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("missing backend: {0}")]
    MissingBackend(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("sql error: {0}")]
    Sql(String),

    #[error("schema index error: {0}")]
    Index(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("tracing initialization failed: {0}")]
    Tracing(String),
}

impl Nl2SqlError {
    /// true for errors that abort a run before any sql exists
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Nl2SqlError::NoTablesFound
                | Nl2SqlError::SchemaUnavailable(_)
                | Nl2SqlError::MissingBackend(_)
        )
    }

    /// the backend's own message for sql and llm failures, the full text otherwise
    pub fn into_detail(self) -> String {
        match self {
            Nl2SqlError::Sql(message) | Nl2SqlError::Llm(message) => message,
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Nl2SqlError {
    fn from(e: rusqlite::Error) -> Self {
        Nl2SqlError::Sql(e.to_string())
    }
}

impl From<reqwest::Error> for Nl2SqlError {
    fn from(e: reqwest::Error) -> Self {
        Nl2SqlError::Llm(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;
