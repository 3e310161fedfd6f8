//! Errors surfaced to callers.
//!
//! [`ConfigError`] is returned when a request is built and is the only error that can occur
//! before any I/O. [`StatusError`] is only produced when a caller explicitly checks the status of
//! a [`Response`](crate::response::Response). Network failures never show up here, they are
//! turned into status bearing responses instead.

use std::io;

use thiserror::Error;

use crate::rest::Method;
use crate::status::Status;

/// A request was configured inconsistently.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// More than one of timeout, max-block and stale-block was set.
    #[error("only one of timeout, max-block period and stale-block period may be set")]
    ConflictingTimingPolicy,
    /// A body was attached to a method that is answered from the cache.
    #[error("{0} requests cannot have a body")]
    BodyNotAllowed(Method),
    /// The method set on the request disagrees with `_method=` in the URL.
    #[error("method {explicit} conflicts with {embedded} declared in the URL")]
    MethodConflict { explicit: Method, embedded: Method },
    /// An unknown method name.
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    /// The URL could not be parsed.
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL contains a character outside of RFC 3986 with strict validation on.
    #[error("invalid character {0:?} in URL")]
    InvalidUrlCharacter(char),
    /// Only `http` and `https` are supported.
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
}

/// An error status, as returned by [`Response::check_status`](crate::response::Response::check_status).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("not acceptable: {0}")]
    NotAcceptable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any of the timeout statuses (408, 504, 522, 524, 598, 599).
    #[error("timeout ({status}): {message}")]
    Timeout { status: Status, message: String },
    #[error("{status}: {message}")]
    Other { status: Status, message: String },
}

impl StatusError {
    /// Creates the error for an error `status`.
    pub fn new(status: Status, message: String) -> Self {
        match status {
            Status::BadRequest => Self::BadRequest(message),
            Status::Unauthorized => Self::NotAuthorized(message),
            Status::PaymentRequired => Self::PaymentRequired(message),
            Status::Forbidden => Self::Forbidden(message),
            Status::NotFound => Self::NotFound(message),
            Status::MethodNotAllowed => Self::MethodNotAllowed(message),
            Status::NotAcceptable => Self::NotAcceptable(message),
            Status::Conflict => Self::Conflict(message),
            status if status.is_timeout() => Self::Timeout { status, message },
            status => Self::Other { status, message },
        }
    }

    /// The status this error was created from.
    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotAuthorized(_) => Status::Unauthorized,
            Self::PaymentRequired(_) => Status::PaymentRequired,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::MethodNotAllowed(_) => Status::MethodNotAllowed,
            Self::NotAcceptable(_) => Status::NotAcceptable,
            Self::Conflict(_) => Status::Conflict,
            Self::Timeout { status, .. } | Self::Other { status, .. } => *status,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The content of a response could not be projected into the requested form.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read content")]
    Io(#[from] io::Error),
    #[error("content is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// The content is not of the requested kind at all.
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),
}
