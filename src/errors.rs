use crate::StatusCode;
use std::io;
use thiserror::Error;

/// Fail-fast outcome of reading a request head.
///
/// Everything except [`RemoteClosed`](ErrorKind::RemoteClosed) and
/// [`Io`](ErrorKind::Io) is answered with an error response before the
/// connection closes.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ErrorKind {
    #[error("peer closed the connection")]
    RemoteClosed,

    #[error("malformed request: {0}")]
    BadFormat(&'static str),
    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("request target too long")]
    UriTooLong,
    #[error("too many header fields")]
    TooManyHeaders,
    #[error("header field too large")]
    HeaderTooLarge,

    #[error("i/o error: {0}")]
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident => $status:ident;)*) => {
        impl ErrorKind {
            /// Status of the error response, `None` when no response is sent.
            pub(crate) const fn status(&self) -> Option<StatusCode> {
                match self {
                    $( Self::$name { .. } => Some(StatusCode::$status), )*
                    Self::RemoteClosed | Self::Io(_) => None,
                }
            }
        }
    };
}

http_errors! {
    BadFormat => BadRequest;
    UnsupportedVersion => HttpVersionNotSupported;
    UriTooLong => UriTooLong;
    TooManyHeaders => RequestHeaderFieldsTooLarge;
    HeaderTooLarge => RequestHeaderFieldsTooLarge;
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ErrorKind::RemoteClosed,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug, Error)]
#[error(transparent)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Why a request entity could not be decoded.
///
/// Each variant maps to the status the request is answered with, see
/// [`status`](EntityError::status).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EntityError {
    /// Neither `Content-Length` nor chunked framing on a request with a body.
    #[error("length required")]
    LengthRequired,
    /// `Content-Length` that is not a decimal number.
    #[error("invalid Content-Length")]
    InvalidLength,
    /// `chunked` repeated or not the last transfer coding.
    #[error("invalid Transfer-Encoding")]
    InvalidFraming,
    /// A transfer coding the engine cannot remove.
    #[error("unsupported transfer coding")]
    UnsupportedTransferCoding,
    /// A content coding the engine cannot remove.
    #[error("unsupported content coding")]
    UnsupportedContentCoding,
    /// Any `Expect` other than `100-continue`.
    #[error("unsupported expectation")]
    ExpectationFailed,
    /// Declared or decoded entity larger than [`ReqLimits::body_size`](crate::limits::ReqLimits::body_size).
    #[error("entity too large")]
    TooLarge,
    /// Framing or coding errors in the entity itself.
    #[error("malformed entity")]
    Malformed,
}

impl EntityError {
    pub const fn status(self) -> StatusCode {
        match self {
            Self::LengthRequired => StatusCode::LengthRequired,
            Self::InvalidLength | Self::InvalidFraming | Self::Malformed => StatusCode::BadRequest,
            Self::UnsupportedTransferCoding => StatusCode::NotImplemented,
            Self::UnsupportedContentCoding => StatusCode::UnsupportedMediaType,
            Self::ExpectationFailed => StatusCode::ExpectationFailed,
            Self::TooLarge => StatusCode::PayloadTooLarge,
        }
    }
}
