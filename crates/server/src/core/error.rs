use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::directory::DirectoryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Persistence or network unavailable; not retried here
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Validation(msg) => Error::Validation(msg),
            DirectoryError::Forbidden(msg) => Error::Forbidden(msg),
            DirectoryError::NotFound(msg) => Error::NotFound(msg),
            DirectoryError::Persistence(msg) => Error::Unavailable(msg),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Unavailable(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_errors_keep_their_class() {
        let forbidden: Error = DirectoryError::Forbidden("not a member".into()).into();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let missing: Error = DirectoryError::NotFound("chat".into()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let io: Error = DirectoryError::Persistence("disk full".into()).into();
        assert_eq!(io.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
