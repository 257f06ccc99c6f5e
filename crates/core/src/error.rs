use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(usize),

    #[error("proportion must be in (0, 1], got {0}")]
    InvalidProportion(f64),

    #[error("certainty cutoff must be in (0, 1), got {0}")]
    InvalidCutoff(f64),

    #[error("{phase} temperature must be in [0, 2], got {value}")]
    InvalidTemperature { phase: &'static str, value: f32 },

    #[error("{phase} model identifier is empty")]
    EmptyModel { phase: &'static str },

    #[error("query is empty")]
    EmptyQuery,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("transport error calling {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    #[error("completion endpoint {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl CompletionError {
    /// Network, timeout and auth failures. Callers treat these as transient.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corpus json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corpus record {line} is invalid: {details}")]
    InvalidRecord { line: usize, details: String },

    #[error("duplicate row_id {0} in corpus")]
    DuplicateRowId(u64),

    #[error("unsupported corpus format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid settings: {0}")]
    Invalid(String),
}
