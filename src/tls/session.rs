//! Resumable session handle

use super::config::TlsVersion;
use super::error::Result;
use openssl::ssl::{SslSession, SslSessionRef};
use std::fmt;

/// A negotiated session that a later connection may resume
///
/// A `Session` is its own copy of the engine's session and stays resumable
/// after the connection that produced it is gone, however that connection
/// ended. Cloning is cheap: clones share one copy.
#[derive(Clone)]
pub struct Session {
    inner: SslSession,
}

impl Session {
    pub(crate) fn new(inner: SslSession) -> Self {
        Session { inner }
    }

    /// Copy a live engine session
    ///
    /// The engine marks a connection's session unresumable when that
    /// connection is freed without a completed shutdown, so handles never
    /// share the live object.
    pub(crate) fn snapshot(live: &SslSessionRef) -> Result<Self> {
        Ok(Session::new(SslSession::from_der(&live.to_der()?)?))
    }

    /// A private copy for one connection to resume from
    pub(crate) fn for_connection(&self) -> Result<SslSession> {
        Ok(SslSession::from_der(&self.inner.to_der()?)?)
    }

    /// Decode a session previously encoded with [`Session::to_der`]
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Session::new(SslSession::from_der(der)?))
    }

    /// Encode the session (including its secrets) as DER
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.to_der()?)
    }

    /// Session identifier; empty for ticket-only TLS 1.3 sessions
    pub fn id(&self) -> &[u8] {
        self.inner.id()
    }

    /// Maximum early data the server will accept when resuming
    pub fn max_early_data(&self) -> u32 {
        self.inner.max_early_data()
    }

    pub fn protocol_version(&self) -> Option<TlsVersion> {
        TlsVersion::from_openssl(self.inner.protocol_version())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id_len", &self.id().len())
            .field("protocol_version", &self.protocol_version())
            .field("max_early_data", &self.max_early_data())
            .finish()
    }
}
