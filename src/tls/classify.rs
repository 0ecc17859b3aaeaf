//! Engine result classification
//!
//! Every engine call ends in one of four ways from the caller's point of
//! view: it completed, it needs the pipe pumped in one direction, the peer
//! closed cleanly, or the connection is dead. [`classify`] maps the raw
//! engine outcome onto exactly one of those. A deferred client certificate
//! lookup is the one non-fatal error on top.

use super::error::{diagnostics_of, DiagnosticCode, FatalError, FatalReason, TlsError};
use openssl::ssl::{self, ErrorCode};
use std::io;

/// Which way the pipe must move before retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Feed more bytes from the network into the caller endpoint
    Read,
    /// Drain the caller endpoint to the network
    Write,
}

/// Outcome of a non-blocking operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Completed
    Ready(T),
    /// Pump the pipe in the given direction and call again
    WouldBlock(Direction),
    /// The peer sent close_notify
    PeerClosed,
}

impl<T> Poll<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Poll::Ready(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Poll<U> {
        match self {
            Poll::Ready(value) => Poll::Ready(f(value)),
            Poll::WouldBlock(direction) => Poll::WouldBlock(direction),
            Poll::PeerClosed => Poll::PeerClosed,
        }
    }

    pub fn as_ref(&self) -> Poll<&T> {
        match self {
            Poll::Ready(value) => Poll::Ready(value),
            Poll::WouldBlock(direction) => Poll::WouldBlock(*direction),
            Poll::PeerClosed => Poll::PeerClosed,
        }
    }

    /// The completed value, if any
    pub fn ready(self) -> Option<T> {
        match self {
            Poll::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Result of a connection operation
pub type PollResult<T> = Result<Poll<T>, TlsError>;

/// State of the pipe underneath the engine at classification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Open,
    Released,
}

/// What the engine reported for a failed call
#[derive(Debug)]
pub struct EngineFailure {
    pub code: ErrorCode,
    pub io_kind: Option<io::ErrorKind>,
    pub diagnostics: Vec<DiagnosticCode>,
}

/// Raw engine outcome, before classification
#[derive(Debug)]
pub enum RawOutcome<T> {
    Done(T),
    Failed(EngineFailure),
}

impl<T> From<Result<T, ssl::Error>> for RawOutcome<T> {
    fn from(result: Result<T, ssl::Error>) -> Self {
        match result {
            Ok(value) => RawOutcome::Done(value),
            Err(err) => RawOutcome::Failed(EngineFailure {
                code: err.code(),
                io_kind: err.io_error().map(io::Error::kind),
                diagnostics: err.ssl_error().map(diagnostics_of).unwrap_or_default(),
            }),
        }
    }
}

/// Map a raw engine outcome to a [`PollResult`]
///
/// Rules apply in order: success, clean closure, released transport,
/// retry, client certificate request, transport I/O error, EOF without
/// close_notify, library error, and finally any unrecognised code.
///
/// A client certificate request comes back with an empty issuer list; the
/// caller holding the engine fills it in.
pub fn classify<T>(raw: RawOutcome<T>, transport: TransportStatus) -> PollResult<T> {
    let failure = match raw {
        RawOutcome::Done(value) => return Ok(Poll::Ready(value)),
        RawOutcome::Failed(failure) => failure,
    };

    if failure.code == ErrorCode::ZERO_RETURN {
        return Ok(Poll::PeerClosed);
    }

    let fatal = |reason| -> PollResult<T> {
        Err(TlsError::Fatal(FatalError::new(reason, failure.diagnostics)))
    };

    if transport == TransportStatus::Released {
        return fatal(FatalReason::TransportClosed);
    }

    match failure.code {
        ErrorCode::WANT_READ => Ok(Poll::WouldBlock(Direction::Read)),
        ErrorCode::WANT_WRITE => Ok(Poll::WouldBlock(Direction::Write)),
        code if code.as_raw() == openssl_sys::SSL_ERROR_WANT_X509_LOOKUP => {
            Err(TlsError::ClientCertificateRequested(Vec::new()))
        }
        ErrorCode::SYSCALL => match failure.io_kind {
            Some(kind) => fatal(FatalReason::Io(kind)),
            None => fatal(FatalReason::UnexpectedEof),
        },
        ErrorCode::SSL => fatal(FatalReason::Protocol),
        other => fatal(FatalReason::Internal(other.as_raw())),
    }
}
