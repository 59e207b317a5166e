use thiserror::Error;

/// Raised while turning configuration text into a snapshot. Fatal to the
/// load or reload attempt that produced it, never to a running server.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("action #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("duplicate action name: {0}")]
    DuplicateAction(String),

    #[error("invalid action name '{0}': must be 1-64 characters of [A-Za-z0-9._-] starting with a letter or digit")]
    InvalidActionName(String),

    #[error("action '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("malformed token entry on line {line}: expected 'token: user'")]
    MalformedTokenLine { line: usize },

    #[error("duplicate token on line {line}")]
    DuplicateToken { line: usize },

    #[error("malformed token entry #{entry}: token and user must be non-empty strings")]
    MalformedTokenEntry { entry: usize },

    #[error("duplicate token in entry #{entry}")]
    DuplicateTokenEntry { entry: usize },

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Why a request was refused by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,
}

/// The executor is already running its maximum number of children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("service busy: {limit} commands already running")]
    ServiceBusy { limit: usize },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
