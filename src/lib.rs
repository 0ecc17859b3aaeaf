//! pipetls - socket-less TLS client engine
//!
//! This crate drives a TLS client handshake and encrypted data channel over
//! an in-memory duplex pipe, leaving all network I/O to the caller.

pub mod pipe;
pub mod tls;

pub use pipe::{Endpoint, PipeError, Side, TransportPipe};
pub use tls::{Connection, Direction, HandshakeState, Poll, PollResult, TlsConfig, TlsError};
