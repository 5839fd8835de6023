use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Domain error taxonomy shared by every mercury crate.
///
/// The send workflow branches on these: `Transient` on the primary message
/// insert is the only fatal failure, `AlreadyExists` collapses into the
/// first writer's result, everything after persistence is logged and dropped.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}

impl From<diesel::result::Error> for CoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};
        match err {
            DieselError::NotFound => CoreError::NotFound("row not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                CoreError::AlreadyExists(info.message().to_string())
            }
            other => CoreError::Transient(other.to_string()),
        }
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for CoreError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        CoreError::Transient(format!("db pool: {err}"))
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::Transient(format!("redis: {err}"))
    }
}

impl From<rdkafka::error::KafkaError> for CoreError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        CoreError::Transient(format!("kafka: {err}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization: {err}"))
    }
}
