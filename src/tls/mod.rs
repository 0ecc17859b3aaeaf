//! Client TLS over an in-memory pipe
//!
//! This module drives an OpenSSL client handshake and record layer without
//! owning a socket. All TLS bytes pass through a
//! [`TransportPipe`](crate::pipe::TransportPipe); the caller moves them to
//! and from the network whenever an operation reports
//! [`Poll::WouldBlock`].
//!
//! # Architecture
//!
//! 1. `TlsConfig` holds client settings (versions, ciphers, SNI, session, OCSP)
//! 2. `Connection` owns the engine and the pipe's engine endpoint
//! 3. `classify` turns every engine outcome into `Ready`, `WouldBlock`,
//!    `PeerClosed` or a fatal error
//! 4. Introspection (`protocol_version`, `cipher`, `peer_cert_chain`, ...)
//!    answers once the handshake has completed
//!
//! # Features
//!
//! - TLS 1.0 through TLS 1.3 (OpenSSL version dependent, 1.1.1 or later)
//! - Session resumption and TLS 1.3 early data
//! - OCSP stapling requests
//! - ALPN and SNI
//! - Client certificates, or a signal when the server asks for one
//! - Signature algorithm restriction and ephemeral key reporting
//! - Negotiation-time cipher capture
//!
//! # Example
//!
//! ```no_run
//! use pipetls::tls::{Connection, TlsConfig, TlsVersion};
//!
//! let mut config = TlsConfig::client();
//! config.set_version(TlsVersion::Tls13);
//! config.set_servername("example.com").unwrap();
//! config.request_ocsp();
//!
//! let (mut conn, mut caller) = Connection::with_pipe(config).unwrap();
//! conn.advance_handshake().unwrap();
//! let client_hello = caller.read(16 * 1024).unwrap();
//! // ... send client_hello, feed the reply into `caller`, repeat ...
//! ```

pub mod capture;
pub mod cert;
pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
mod ffi;
pub mod handshake;
pub mod introspect;
pub mod ocsp;
pub mod session;

pub use capture::{CaptureMode, CipherCapture, CipherDescriptor, NoCapture, StepCapture};
pub use cert::{CertInfo, PeerCertChain};
pub use classify::{classify, Direction, Poll, PollResult, RawOutcome, TransportStatus};
pub use config::{TlsConfig, TlsVersion, VerifyMode, STATUS_TYPE_OCSP};
pub use connection::{Connection, EarlyDataStatus, ShutdownStatus};
pub use error::{ConfigError, DiagnosticCode, FatalError, FatalReason, Result, TlsError};
pub use handshake::HandshakeState;
pub use introspect::{
    available_compression_methods, EphemeralKey, KeyExchange, ProtocolVersion, VerifyResult,
};
pub use ocsp::StapledOcsp;
pub use session::Session;
