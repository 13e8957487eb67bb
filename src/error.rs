use thiserror::Error;

/// Failures talking to the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures on the quota path. Callers must treat every variant as a denial.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota store failure: {0}")]
    Store(#[from] StoreError),

    #[error("user id must not be empty")]
    InvalidUser,

    #[error("unknown tier: {0}")]
    UnknownTier(String),
}

/// Failures from the external AI provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing API key: set {0}")]
    MissingApiKey(String),

    #[error("unexpected provider response: {0}")]
    Malformed(String),
}
