use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Borrow the kind of this error.
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Test whether this error indicates that the remote end reported an
    /// error reply to a method call, and if so, extract its details.
    pub fn as_error_reply(&self) -> Option<(&str, &crate::Value)> {
        match &self.kind {
            ErrorKind::ErrorReply { name, body } => Some((name, body)),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::TransportIo(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::InvalidUtf8(error))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidSignature(message) => {
                write!(f, "invalid signature: {message}")
            }
            ErrorKind::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected `{expected}`, found `{found}`")
            }
            ErrorKind::ShortBuffer => write!(f, "short buffer"),
            ErrorKind::Malformed(message) => write!(f, "malformed message: {message}"),
            ErrorKind::InvalidUtf8(error) => write!(f, "invalid utf-8: {error}"),
            ErrorKind::AuthFailed => write!(f, "authentication failed"),
            ErrorKind::UnknownAuthCommand(command) => {
                write!(f, "unknown auth command: {command}")
            }
            ErrorKind::TransportIo(error) => write!(f, "transport i/o error: {error}"),
            ErrorKind::ConnectionClosed => write!(f, "connection closed"),
            ErrorKind::InvalidIntrospect(message) => {
                write!(f, "invalid introspection document: {message}")
            }
            ErrorKind::NoSuchMethod(name) => write!(f, "no such method: {name}"),
            ErrorKind::NoSuchInterface(name) => write!(f, "no such interface: {name}"),
            ErrorKind::ErrorReply { name, .. } => write!(f, "error reply: {name}"),
            ErrorKind::Cancelled => write!(f, "call cancelled"),
            ErrorKind::MissingBus => write!(f, "missing session or system bus address"),
            ErrorKind::InvalidAddress(address) => write!(f, "invalid bus address: {address}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::TransportIo(error) => Some(error),
            ErrorKind::InvalidUtf8(error) => Some(error),
            _ => None,
        }
    }
}

/// The taxonomy of errors this crate can raise.
///
/// This is deliberately not exposed as a public enum: callers match on
/// [`Error::as_error_reply`] for the one case (a remote error reply) that
/// carries data worth inspecting programmatically.
#[derive(Debug)]
pub(crate) enum ErrorKind {
    InvalidSignature(String),
    TypeMismatch {
        expected: String,
        found: String,
    },
    ShortBuffer,
    Malformed(String),
    InvalidUtf8(Utf8Error),
    AuthFailed,
    UnknownAuthCommand(String),
    TransportIo(io::Error),
    ConnectionClosed,
    InvalidIntrospect(String),
    NoSuchMethod(String),
    NoSuchInterface(String),
    ErrorReply {
        name: String,
        body: crate::Value,
    },
    Cancelled,
    MissingBus,
    InvalidAddress(String),
}
