//! Error kind enumeration for categorizing errors.

/// Categorization of errors raised by the multiplexer, the propagators and
/// the pipeline nodes.
///
/// ## Fatal vs Absorbed
///
/// | ErrorKind               | Scope          | Action                          |
/// |-------------------------|----------------|---------------------------------|
/// | `MalformedCarrier`      | Per request    | Start a new root, tag the span  |
/// | `InvalidContext`        | Per request    | Skip injection                  |
/// | `ClassificationTimeout` | Per connection | Drop the connection, count it   |
/// | `ConnectionClosed`      | Per connection | Drop silently, count it         |
/// | `ListenerClosed`        | Listener       | Clean shutdown                  |
/// | `EngineFatal`           | Listener       | Tear down both engines          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A carrier claimed to hold a trace context but could not be decoded.
    ///
    /// Bad hex in a header, a truncated queue frame or a length prefix
    /// that exceeds the buffer all land here.
    #[error("malformed carrier")]
    MalformedCarrier,

    /// A trace context with a zero trace or span id was about to be
    /// injected.
    #[error("invalid trace context")]
    InvalidContext,

    /// The sniffer could not classify a connection before its deadline and
    /// the timeout policy says to drop it.
    #[error("classification timeout")]
    ClassificationTimeout,

    /// The peer closed the connection before the sniffer reached a verdict.
    #[error("connection closed")]
    ConnectionClosed,

    /// A sub-listener was closed because the root listener shut down.
    ///
    /// Engines surface this when they stop cleanly; it is never fatal.
    #[error("listener closed")]
    ListenerClosed,

    /// One of the protocol engines failed for a reason other than
    /// [`ListenerClosed`](ErrorKind::ListenerClosed).
    #[error("engine fatal error")]
    EngineFatal,

    /// Requested resource was not found.
    ///
    /// HTTP: 404 Not Found
    /// gRPC: NOT_FOUND
    #[error("not found")]
    NotFound,

    /// Invalid request argument or payload.
    ///
    /// HTTP: 400 Bad Request
    /// gRPC: INVALID_ARGUMENT
    #[error("invalid argument")]
    InvalidArgument,

    /// An operation did not complete within its deadline.
    ///
    /// HTTP: 504 Gateway Timeout
    /// gRPC: DEADLINE_EXCEEDED
    #[error("timeout")]
    Timeout,

    /// A peer or collaborator is temporarily unavailable.
    ///
    /// HTTP: 503 Service Unavailable
    /// gRPC: UNAVAILABLE
    #[error("service unavailable")]
    Unavailable,

    /// Connection error (refused, reset, unreachable).
    #[error("connection error")]
    Connection,

    /// Protocol error (malformed response, unexpected status, bad JSON).
    #[error("protocol error")]
    Protocol,

    /// Configuration error (invalid address, bad environment variable).
    #[error("configuration error")]
    Configuration,

    /// Internal error.
    ///
    /// HTTP: 500 Internal Server Error
    /// gRPC: INTERNAL
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns `true` if an error of this kind ends the whole server rather
    /// than a single connection or request.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::EngineFatal)
    }

    /// Returns the default HTTP status code for this error kind.
    #[inline]
    pub fn http_status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidArgument | ErrorKind::MalformedCarrier => 400,
            ErrorKind::Timeout | ErrorKind::ClassificationTimeout => 504,
            ErrorKind::Unavailable | ErrorKind::ListenerClosed => 503,
            ErrorKind::Connection | ErrorKind::ConnectionClosed | ErrorKind::Protocol => 502,
            ErrorKind::InvalidContext
            | ErrorKind::EngineFatal
            | ErrorKind::Configuration
            | ErrorKind::Internal => 500,
        }
    }

    /// Creates an `ErrorKind` from an HTTP status code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidArgument,
            404 => ErrorKind::NotFound,
            502 => ErrorKind::Protocol,
            503 => ErrorKind::Unavailable,
            504 => ErrorKind::Timeout,
            _ if (400..500).contains(&status) => ErrorKind::InvalidArgument,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns the gRPC status code for this error kind.
    #[cfg(feature = "grpc")]
    pub fn grpc_code(&self) -> tonic::Code {
        use tonic::Code;
        match self {
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::InvalidArgument | ErrorKind::MalformedCarrier => Code::InvalidArgument,
            ErrorKind::Timeout | ErrorKind::ClassificationTimeout => Code::DeadlineExceeded,
            ErrorKind::Unavailable
            | ErrorKind::Connection
            | ErrorKind::ConnectionClosed
            | ErrorKind::ListenerClosed => Code::Unavailable,
            ErrorKind::Protocol => Code::Unknown,
            ErrorKind::InvalidContext
            | ErrorKind::EngineFatal
            | ErrorKind::Configuration
            | ErrorKind::Internal => Code::Internal,
        }
    }

    /// Creates an `ErrorKind` from a gRPC status code.
    #[cfg(feature = "grpc")]
    pub fn from_grpc_code(code: tonic::Code) -> Self {
        use tonic::Code;
        match code {
            Code::NotFound => ErrorKind::NotFound,
            Code::InvalidArgument | Code::OutOfRange | Code::FailedPrecondition => {
                ErrorKind::InvalidArgument
            }
            Code::DeadlineExceeded => ErrorKind::Timeout,
            Code::Unavailable | Code::ResourceExhausted => ErrorKind::Unavailable,
            Code::Unimplemented | Code::Unknown => ErrorKind::Protocol,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fatal() {
        assert!(ErrorKind::EngineFatal.is_fatal());

        assert!(!ErrorKind::ListenerClosed.is_fatal());
        assert!(!ErrorKind::ClassificationTimeout.is_fatal());
        assert!(!ErrorKind::ConnectionClosed.is_fatal());
        assert!(!ErrorKind::MalformedCarrier.is_fatal());
    }

    #[test]
    fn test_http_status_code() {
        assert_eq!(ErrorKind::NotFound.http_status_code(), 404);
        assert_eq!(ErrorKind::InvalidArgument.http_status_code(), 400);
        assert_eq!(ErrorKind::MalformedCarrier.http_status_code(), 400);
        assert_eq!(ErrorKind::Timeout.http_status_code(), 504);
        assert_eq!(ErrorKind::Unavailable.http_status_code(), 503);
        assert_eq!(ErrorKind::Protocol.http_status_code(), 502);
        assert_eq!(ErrorKind::Internal.http_status_code(), 500);
        assert_eq!(ErrorKind::EngineFatal.http_status_code(), 500);
    }

    #[test]
    fn test_from_http_status() {
        assert_eq!(ErrorKind::from_http_status(400), ErrorKind::InvalidArgument);
        assert_eq!(ErrorKind::from_http_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_http_status(502), ErrorKind::Protocol);
        assert_eq!(ErrorKind::from_http_status(503), ErrorKind::Unavailable);
        assert_eq!(ErrorKind::from_http_status(504), ErrorKind::Timeout);

        // 4xx range falls back to InvalidArgument
        assert_eq!(ErrorKind::from_http_status(422), ErrorKind::InvalidArgument);

        // everything else is internal
        assert_eq!(ErrorKind::from_http_status(500), ErrorKind::Internal);
        assert_eq!(ErrorKind::from_http_status(501), ErrorKind::Internal);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::MalformedCarrier.to_string(), "malformed carrier");
        assert_eq!(ErrorKind::ClassificationTimeout.to_string(), "classification timeout");
        assert_eq!(ErrorKind::ListenerClosed.to_string(), "listener closed");
        assert_eq!(ErrorKind::EngineFatal.to_string(), "engine fatal error");
        assert_eq!(ErrorKind::NotFound.to_string(), "not found");
    }

    #[cfg(feature = "grpc")]
    #[test]
    fn test_grpc_code_mapping() {
        use tonic::Code;

        assert_eq!(ErrorKind::NotFound.grpc_code(), Code::NotFound);
        assert_eq!(ErrorKind::Timeout.grpc_code(), Code::DeadlineExceeded);
        assert_eq!(ErrorKind::Internal.grpc_code(), Code::Internal);

        assert_eq!(ErrorKind::from_grpc_code(Code::NotFound), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_grpc_code(Code::DeadlineExceeded), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_grpc_code(Code::Unavailable), ErrorKind::Unavailable);
        assert_eq!(ErrorKind::from_grpc_code(Code::Unimplemented), ErrorKind::Protocol);
        assert_eq!(ErrorKind::from_grpc_code(Code::DataLoss), ErrorKind::Internal);
    }
}
