use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    DatabaseError(String),
    ConfigurationError(String),
    ValidationError(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            RelayError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            RelayError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<sqlx::Error> for RelayError {
    fn from(error: sqlx::Error) -> Self {
        RelayError::DatabaseError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
