//! TLS error types
//!
//! Retry conditions (`WouldBlock`) and clean closure (`PeerClosed`) are not
//! errors; they are reported through [`Poll`](super::Poll). Everything here
//! means the operation did not happen.

use super::handshake::HandshakeState;
use openssl::error::ErrorStack;
use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Crate result type
pub type Result<T> = std::result::Result<T, TlsError>;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: HandshakeState,
    },

    #[error("connection already terminated ({0})")]
    AlreadyTerminated(HandshakeState),

    #[error("{0} is not available before the handshake completes")]
    NotYetAvailable(&'static str),

    #[error("fatal TLS error: {0}")]
    Fatal(#[from] FatalError),

    /// The server asked for a client certificate and none is configured.
    /// Carries the issuers the server accepts; the connection stays in
    /// `Handshaking` and keeps reporting this until it is dropped.
    #[error("server requested a client certificate (acceptable issuers: {0:?})")]
    ClientCertificateRequested(Vec<String>),

    #[error("buffer allocation failed: {0}")]
    ResourceExhausted(#[from] TryReserveError),

    #[error("{operation} is not supported by the engine: {source}")]
    Unsupported {
        operation: &'static str,
        #[source]
        source: ErrorStack,
    },

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

impl TlsError {
    /// Whether this error is the terminal failure of a connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, TlsError::Fatal(_))
    }

    /// The fatal error, if this is one
    pub fn as_fatal(&self) -> Option<&FatalError> {
        match self {
            TlsError::Fatal(fatal) => Some(fatal),
            _ => None,
        }
    }
}

/// Configuration rejected by a setter
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid verify mode: {0}")]
    InvalidVerifyMode(i32),

    #[error("invalid server name: {0:?}")]
    InvalidServerName(String),

    #[error("invalid cipher list {list:?}: {source}")]
    InvalidCipherList {
        list: String,
        #[source]
        source: ErrorStack,
    },

    #[error("invalid TLS 1.3 cipher suites {list:?}: {source}")]
    InvalidCipherSuites {
        list: String,
        #[source]
        source: ErrorStack,
    },

    #[error("invalid status type: {0}")]
    InvalidStatusType(i32),

    #[error("invalid version range: {min} > {max}")]
    InvalidVersionRange {
        min: &'static str,
        max: &'static str,
    },

    #[error("invalid signature algorithms {list:?}: {source}")]
    InvalidSigalgs {
        list: String,
        #[source]
        source: ErrorStack,
    },

    #[error("unknown TLS version: {0:?}")]
    UnknownVersion(String),

    #[error("invalid ALPN protocol list: {0}")]
    InvalidAlpn(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("endpoint is not the engine side of its pipe")]
    WrongEndpoint,
}

/// Why a connection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The engine rejected the peer (alert, verification, malformed record)
    Protocol,
    /// The pipe was released underneath the engine
    TransportClosed,
    /// The peer went away without close_notify
    UnexpectedEof,
    /// The engine's transport reported an I/O error
    Io(io::ErrorKind),
    /// An engine result code with no defined meaning
    Internal(i32),
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::Protocol => f.write_str("protocol failure"),
            FatalReason::TransportClosed => f.write_str("transport closed"),
            FatalReason::UnexpectedEof => f.write_str("unexpected EOF"),
            FatalReason::Io(kind) => write!(f, "I/O error: {}", kind),
            FatalReason::Internal(code) => write!(f, "internal engine error {}", code),
        }
    }
}

/// One entry of the engine's error queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticCode {
    /// Packed OpenSSL error code
    pub code: u64,
    /// Library that raised it
    pub library: Option<String>,
    /// Human-readable reason
    pub reason: Option<String>,
}

impl From<&openssl::error::Error> for DiagnosticCode {
    fn from(err: &openssl::error::Error) -> Self {
        DiagnosticCode {
            code: err.code() as u64,
            library: err.library().map(str::to_string),
            reason: err.reason().map(str::to_string),
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error:{:08X}", self.code)?;
        if let Some(library) = &self.library {
            write!(f, ":{}", library)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ":{}", reason)?;
        }
        Ok(())
    }
}

/// Terminal failure with the engine's diagnostics, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    reason: FatalReason,
    diagnostics: Vec<DiagnosticCode>,
}

impl FatalError {
    pub(crate) fn new(reason: FatalReason, diagnostics: Vec<DiagnosticCode>) -> Self {
        FatalError {
            reason,
            diagnostics,
        }
    }

    pub fn reason(&self) -> FatalReason {
        self.reason
    }

    /// Oldest diagnostic, normally the root cause
    pub fn first(&self) -> Option<&DiagnosticCode> {
        self.diagnostics.first()
    }

    pub fn diagnostics(&self) -> &[DiagnosticCode] {
        &self.diagnostics
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(first) = self.first() {
            write!(f, " ({})", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for FatalError {}

/// Collect an error stack into diagnostics
pub(crate) fn diagnostics_of(stack: &ErrorStack) -> Vec<DiagnosticCode> {
    stack.errors().iter().map(DiagnosticCode::from).collect()
}
