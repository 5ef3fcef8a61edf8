//! Errors.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::backend::BackendError;

/// Everything an endpoint can fail with. Each variant maps to exactly one
/// HTTP status; the body is the variant's display text.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("{0} is required")]
    MissingArg(&'static str),
    #[error("empty upload")]
    EmptyUpload,
    #[error("SciDB authentication failed")]
    AuthFailed,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid session id")]
    UnknownSession,
    /// Non-fatal backend error (query syntax, logic). The session survives.
    #[error("{0}")]
    BackendQuery(String),
    #[error("no query currently running")]
    NoActiveQuery,
    #[error("Output not saved")]
    OutputNotSaved,
    #[error("Output not saved in binary format")]
    NotBinaryFormat,
    #[error("Output not saved in text format")]
    NotTextFormat,
    #[error("EOF - range out of bounds")]
    Eof,
    #[error("server error: {0}")]
    Server(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SciDB connection failed")]
    ConnectFailed,
    /// Fatal backend error (connection, quorum). The session is torn down.
    #[error("{0}")]
    BackendFatal(String),
    #[error("out of sessions")]
    OutOfSessions,
    /// Startup-time configuration problem; never surfaced over HTTP.
    #[error("invalid configuration: {0}")]
    BadConfig(String),
}

impl ShimError {
    pub fn status(&self) -> StatusCode {
        match self {
            ShimError::MissingArg(_) | ShimError::EmptyUpload => StatusCode::BAD_REQUEST,
            ShimError::AuthFailed => StatusCode::UNAUTHORIZED,
            ShimError::Forbidden => StatusCode::FORBIDDEN,
            ShimError::UnknownSession => StatusCode::NOT_FOUND,
            ShimError::BackendQuery(_) => StatusCode::NOT_ACCEPTABLE,
            ShimError::NoActiveQuery => StatusCode::CONFLICT,
            ShimError::OutputNotSaved => StatusCode::GONE,
            ShimError::NotBinaryFormat | ShimError::NotTextFormat | ShimError::Eof => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            ShimError::Server(_) | ShimError::Io(_) | ShimError::BadConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ShimError::ConnectFailed | ShimError::BackendFatal(_) => StatusCode::BAD_GATEWAY,
            ShimError::OutOfSessions => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether this error leaves the session unusable. Fatal backend errors
    /// and internal I/O failures invalidate it; query errors preserve it.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            ShimError::BackendFatal(_)
                | ShimError::ConnectFailed
                | ShimError::Server(_)
                | ShimError::Io(_)
        )
    }
}

impl From<BackendError> for ShimError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Auth => ShimError::AuthFailed,
            BackendError::Connect(_) => ShimError::ConnectFailed,
            err if err.is_fatal() => ShimError::BackendFatal(err.to_string()),
            err => ShimError::BackendQuery(err.to_string()),
        }
    }
}

impl IntoResponse for ShimError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.to_string()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_endpoint_contract() {
        assert_eq!(
            ShimError::MissingArg("id").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ShimError::AuthFailed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ShimError::UnknownSession.status(), StatusCode::NOT_FOUND);
        assert_eq!(ShimError::NoActiveQuery.status(), StatusCode::CONFLICT);
        assert_eq!(ShimError::OutputNotSaved.status(), StatusCode::GONE);
        assert_eq!(ShimError::Eof.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            ShimError::OutOfSessions.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn backend_errors_split_fatal_from_query() {
        let fatal = BackendError::Query(
            "SystemException ... Error id: scidb::SCIDB_SE_NETWORK::SCIDB_LE_CONNECTION_ERROR"
                .to_string(),
        );
        assert!(matches!(
            ShimError::from(fatal),
            ShimError::BackendFatal(_)
        ));

        let syntax = BackendError::Query("UserQueryException ... near 'lis()'".to_string());
        let err = ShimError::from(syntax);
        assert!(matches!(err, ShimError::BackendQuery(_)));
        assert!(!err.invalidates_session());
    }
}
