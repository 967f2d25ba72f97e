//! Main error type.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use super::ErrorKind;

/// The error type returned by every tracemux operation.
///
/// ## Error Hierarchy
///
/// ```text
/// Error
/// ├── kind: ErrorKind          (category for matching)
/// ├── message: String          (human-readable description)
/// └── source: Option           (underlying cause)
/// ```
///
/// ## Example
///
/// ```rust
/// use tracemux::{Error, ErrorKind};
///
/// fn describe(err: &Error) -> &'static str {
///     match err.kind() {
///         ErrorKind::ListenerClosed => "stopped",
///         ErrorKind::MalformedCarrier => "bad trace context, starting a new trace",
///         kind if kind.is_fatal() => "fatal",
///         _ => "request failed",
///     }
/// }
///
/// assert_eq!(describe(&Error::listener_closed()), "stopped");
/// ```
#[derive(Debug)]
pub struct Error {
    /// The error category.
    kind: ErrorKind,

    /// Human-readable error message.
    message: Cow<'static, str>,

    /// The underlying error, if any.
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error with the given kind and message.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tracemux::{Error, ErrorKind};
    ///
    /// let err = Error::new(ErrorKind::MalformedCarrier, "x-trace-id is not hex");
    /// assert_eq!(err.kind(), ErrorKind::MalformedCarrier);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error from a kind with a default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        let message = match kind {
            ErrorKind::MalformedCarrier => "carrier could not be decoded",
            ErrorKind::InvalidContext => "trace context has a zero id",
            ErrorKind::ClassificationTimeout => "connection was not classified in time",
            ErrorKind::ConnectionClosed => "peer closed the connection",
            ErrorKind::ListenerClosed => "listener closed",
            ErrorKind::EngineFatal => "protocol engine failed",
            ErrorKind::NotFound => "resource not found",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Timeout => "operation timed out",
            ErrorKind::Unavailable => "service unavailable",
            ErrorKind::Connection => "connection failed",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Internal => "internal error",
        };
        Self::new(kind, message)
    }

    /// Returns the error kind for categorization.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message without the kind prefix.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if this error ends the whole server.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Returns `true` if this error reports a clean listener shutdown.
    #[inline]
    pub fn is_listener_closed(&self) -> bool {
        self.kind == ErrorKind::ListenerClosed
    }

    /// Sets the source error for this error.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors for common error types

    /// Creates a malformed carrier error.
    pub fn malformed_carrier(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::MalformedCarrier, message)
    }

    /// Creates an invalid context error.
    pub fn invalid_context(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidContext, message)
    }

    /// Creates a classification timeout error.
    pub fn classification_timeout() -> Self {
        Self::from_kind(ErrorKind::ClassificationTimeout)
    }

    /// Creates a connection closed error.
    pub fn connection_closed() -> Self {
        Self::from_kind(ErrorKind::ConnectionClosed)
    }

    /// Creates a listener closed error.
    pub fn listener_closed() -> Self {
        Self::from_kind(ErrorKind::ListenerClosed)
    }

    /// Creates an engine fatal error naming the failed engine.
    pub fn engine_fatal(engine: &str) -> Self {
        Self::new(
            ErrorKind::EngineFatal,
            format!("{engine} engine stopped unexpectedly"),
        )
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// Implement From for common error types

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe => ErrorKind::Connection,
            std::io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionClosed,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::AddrNotAvailable => {
                ErrorKind::Configuration
            }
            _ => ErrorKind::Internal,
        };
        Error::new(kind, err.to_string()).with_source(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::configuration(format!("invalid URL: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::invalid_argument(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::timeout(err.to_string()).with_source(err)
    }
}

#[cfg(feature = "grpc")]
impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let kind = ErrorKind::from_grpc_code(status.code());
        Error::new(kind, status.message().to_string())
    }
}

#[cfg(feature = "grpc")]
impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        tonic::Status::new(err.kind().grpc_code(), err.message().to_string())
    }
}

#[cfg(feature = "grpc")]
impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::connection(format!("gRPC transport error: {}", err)).with_source(err)
    }
}

#[cfg(feature = "rest")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connection
        } else if err.is_decode() {
            ErrorKind::Protocol
        } else if let Some(status) = err.status() {
            ErrorKind::from_http_status(status.as_u16())
        } else {
            ErrorKind::Internal
        };
        Error::new(kind, err.to_string()).with_source(err)
    }
}
