use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Failures of the document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Errors returned by the task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("you must be logged in to do that")]
    Unauthenticated,

    #[error("you are not allowed to modify task {0}")]
    NotAuthorized(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Unauthenticated => "unauthenticated",
            TaskError::NotAuthorized(_) => "not-authorized",
            TaskError::NotFound(_) => "not-found",
            TaskError::Store(_) => "internal",
        }
    }
}

/// Errors returned by signup and login.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username must be 3-32 characters of letters, digits, '.', '_' or '-'")]
    InvalidUsername,

    #[error("username {0} is already taken")]
    UsernameTaken(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidUsername => "invalid-username",
            AuthError::UsernameTaken(_) => "username-taken",
            AuthError::InvalidCredentials => "invalid-credentials",
            AuthError::Hash(_)
            | AuthError::Token(_)
            | AuthError::Blocking(_)
            | AuthError::Store(_) => "internal",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub message: String,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody { error: kind, message })
}

impl ResponseError for TaskError {
    fn status_code(&self) -> StatusCode {
        match self {
            TaskError::Unauthenticated => StatusCode::UNAUTHORIZED,
            TaskError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Store details stay in the server log.
        let message = match self {
            TaskError::Store(e) => {
                log::error!("Task store failure: {}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        error_response(self.status_code(), self.kind(), message)
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidUsername => StatusCode::BAD_REQUEST,
            AuthError::UsernameTaken(_) => StatusCode::CONFLICT,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Hash(_)
            | AuthError::Token(_)
            | AuthError::Blocking(_)
            | AuthError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => {
                log::error!("Account operation failed: {}", self);
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        error_response(self.status_code(), self.kind(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_status_codes() {
        assert_eq!(TaskError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            TaskError::NotAuthorized("t1".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(TaskError::NotFound("t1".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            TaskError::Store(StoreError::Duplicate("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_error_status_codes() {
        assert_eq!(AuthError::InvalidUsername.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::UsernameTaken("alice".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(TaskError::Unauthenticated.kind(), "unauthenticated");
        assert_eq!(TaskError::NotAuthorized("t".into()).kind(), "not-authorized");
        assert_eq!(TaskError::NotFound("t".into()).kind(), "not-found");
    }
}
