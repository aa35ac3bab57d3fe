use actix_web::http::StatusCode;
use diesel::result::DatabaseErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Re-delivery of a callback for an order that is already terminal.
    /// Absorbed by the webhook handler, never returned to the provider.
    #[error("duplicate callback for task {0}")]
    DuplicateCallback(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("missing or unknown actor")]
    Unauthorized,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("bad parameter: {0}")]
    BadRequest(String),

    #[error("rate limited")]
    RateLimited,

    #[error("database error")]
    Database(#[source] diesel::result::Error),

    #[error("connection pool error")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<diesel::result::Error> for CoreError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => CoreError::NotFound("record"),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                CoreError::NotFound("referenced record")
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                CoreError::Conflict(info.message().to_string())
            }
            error => CoreError::Database(error),
        }
    }
}

impl From<actix_web::error::BlockingError> for CoreError {
    fn from(error: actix_web::error::BlockingError) -> Self {
        CoreError::Internal(error.to_string())
    }
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            CoreError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::DuplicateCallback(_) => StatusCode::OK,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::InvalidState(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Database(_) | CoreError::Pool(_) | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = CoreError::InsufficientBalance {
            required: 10,
            available: 3,
        };
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.to_string(), "insufficient balance: required 10, available 3");
        assert_eq!(CoreError::Forbidden("self".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::InvalidState("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(CoreError::NotFound("order").status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: CoreError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
        let err: CoreError = diesel::result::Error::RollbackTransaction.into();
        assert!(matches!(err, CoreError::Database(_)));
    }
}
