//! Post-handshake introspection
//!
//! Queries are side-effect free. They answer once the handshake has
//! completed (including during and after shutdown), report
//! [`TlsError::NotYetAvailable`] before that, and
//! [`TlsError::AlreadyTerminated`] after a fatal error. [`Connection::cipher`]
//! is the exception: it keeps answering after a failure so the caller can
//! see what was negotiated before things went wrong.

use super::capture::CipherDescriptor;
use super::cert::{one_line, PeerCertChain};
use super::config::TlsVersion;
use super::connection::{Connection, Engine, NegotiatedInfo};
use super::error::{Result, TlsError};
use super::ffi;
use super::handshake::HandshakeState;
use super::ocsp::StapledOcsp;
use super::session::Session;
use openssl::pkey::{Id, PKeyRef, Public};
use openssl::ssl::SslRef;
use openssl::x509::X509;
use std::fmt;

/// Negotiated protocol version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// e.g. `TLSv1.2`
    pub name: String,
    /// Wire value, e.g. `0x0303`
    pub number: u16,
}

impl ProtocolVersion {
    pub(crate) fn from_ssl(ssl: &SslRef) -> Self {
        ProtocolVersion {
            name: ssl.version_str().to_string(),
            number: ffi::version(ssl) as u16,
        }
    }

    pub fn tls_version(&self) -> Option<TlsVersion> {
        TlsVersion::from_wire(self.number)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Outcome of peer certificate verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    /// `X509_V_OK` (0) on success
    pub code: i32,
    pub message: String,
}

impl VerifyResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Key exchange family of an ephemeral key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchange {
    /// Finite-field Diffie-Hellman
    Dh,
    /// Elliptic-curve Diffie-Hellman on a named curve
    Ecdh,
    X25519,
    X448,
    /// Anything else the engine negotiated, e.g. a hybrid group
    Other,
}

/// The peer's ephemeral key exchange public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralKey {
    pub kind: KeyExchange,
    /// Key size in bits
    pub bits: u32,
    /// Group name, e.g. `prime256v1` or `X25519`
    pub curve: Option<String>,
}

impl EphemeralKey {
    fn from_pkey(key: &PKeyRef<Public>) -> Self {
        let kind = match key.id() {
            Id::DH | Id::DHX => KeyExchange::Dh,
            Id::EC => KeyExchange::Ecdh,
            Id::X25519 => KeyExchange::X25519,
            Id::X448 => KeyExchange::X448,
            _ => KeyExchange::Other,
        };
        let curve = match kind {
            KeyExchange::Ecdh => key
                .ec_key()
                .ok()
                .and_then(|ec| ec.group().curve_name())
                .and_then(|nid| nid.short_name().ok())
                .map(str::to_string),
            KeyExchange::X25519 => Some("X25519".to_string()),
            KeyExchange::X448 => Some("X448".to_string()),
            _ => None,
        };
        EphemeralKey {
            kind,
            bits: key.bits(),
            curve,
        }
    }
}

/// Compression methods the engine was built with
pub fn available_compression_methods() -> Vec<String> {
    ffi::compression_methods()
}

impl Connection {
    fn established_ssl(&self, what: &'static str) -> Result<&SslRef> {
        self.ensure_not_errored()?;
        if !self.state().is_established() {
            return Err(TlsError::NotYetAvailable(what));
        }
        match &self.engine {
            Engine::Running(stream) => Ok(stream.ssl()),
            _ => Err(TlsError::NotYetAvailable(what)),
        }
    }

    fn negotiated(&self, what: &'static str) -> Result<&NegotiatedInfo> {
        self.established_ssl(what)?;
        self.info.as_ref().ok_or(TlsError::NotYetAvailable(what))
    }

    pub fn protocol_version(&self) -> Result<ProtocolVersion> {
        Ok(self.negotiated("protocol version")?.version.clone())
    }

    /// Negotiated cipher suite
    ///
    /// Available from the first handshake step on, and still available after
    /// a fatal error when the cipher was captured during negotiation.
    /// `None` when no cipher has been chosen yet.
    pub fn cipher(&self) -> Result<Option<CipherDescriptor>> {
        if self.state() == HandshakeState::Configured {
            return Err(TlsError::NotYetAvailable("cipher"));
        }
        if let Some(info) = &self.info {
            return Ok(info.cipher.clone());
        }
        if let Some(captured) = self.capture.captured() {
            return Ok(Some(captured.clone()));
        }
        Ok(match &self.engine {
            Engine::Running(stream) => stream
                .ssl()
                .current_cipher()
                .map(CipherDescriptor::from_cipher),
            _ => None,
        })
    }

    /// Peer certificates, leaf first, as presented during the handshake
    pub fn peer_cert_chain(&self) -> Result<Option<PeerCertChain>> {
        Ok(self.negotiated("peer certificate chain")?.chain.clone())
    }

    pub fn peer_certificate(&self) -> Result<Option<X509>> {
        Ok(self.established_ssl("peer certificate")?.peer_certificate())
    }

    /// CAs the server named in its certificate request, one-line form
    pub fn client_ca_list(&self) -> Result<Vec<String>> {
        let ssl = self.established_ssl("client CA list")?;
        Ok(ffi::client_ca_names(ssl).into_iter().map(one_line).collect())
    }

    pub fn verify_result(&self) -> Result<VerifyResult> {
        let result = self.established_ssl("verify result")?.verify_result();
        Ok(VerifyResult {
            code: result.as_raw(),
            message: result.error_string().to_string(),
        })
    }

    /// Digest the peer signed the handshake with, e.g. `SHA256`
    pub fn peer_signature_digest(&self) -> Result<Option<&'static str>> {
        let ssl = self.established_ssl("peer signature digest")?;
        Ok(ffi::peer_signature_digest(ssl))
    }

    /// Signature algorithm the peer signed the handshake with, e.g. `id-ecPublicKey`
    pub fn peer_signature_type(&self) -> Result<Option<&'static str>> {
        let ssl = self.established_ssl("peer signature type")?;
        Ok(ffi::peer_signature_type(ssl))
    }

    /// Session to resume on a later connection
    ///
    /// Under TLS 1.3 the resumable session arrives after the handshake, so
    /// call this once some application data has been read. The returned
    /// handle is a copy and outlives this connection.
    pub fn session(&self) -> Result<Option<Session>> {
        let ssl = self.established_ssl("session")?;
        ssl.session().map(Session::snapshot).transpose()
    }

    pub fn session_reused(&self) -> Result<bool> {
        Ok(self.established_ssl("session reuse")?.session_reused())
    }

    /// Stapled OCSP response, if one was requested and sent
    pub fn ocsp_response(&self) -> Result<Option<StapledOcsp>> {
        let ssl = self.established_ssl("OCSP response")?;
        let Some(der) = ssl.ocsp_status() else {
            return Ok(None);
        };
        let chain = ssl.peer_cert_chain().map(PeerCertChain::snapshot).transpose()?;
        Ok(Some(StapledOcsp::parse(der, chain)?))
    }

    pub fn compression_method(&self) -> Result<Option<String>> {
        let ssl = self.established_ssl("compression method")?;
        Ok(ffi::current_compression(ssl))
    }

    pub fn alpn_protocol(&self) -> Result<Option<String>> {
        let ssl = self.established_ssl("ALPN protocol")?;
        Ok(ssl
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned()))
    }

    /// Ephemeral key the server used for the key exchange
    ///
    /// `None` for key exchanges without one, such as static RSA or a
    /// resumed TLS 1.2 session.
    pub fn ephemeral_key(&self) -> Result<Option<EphemeralKey>> {
        let ssl = self.established_ssl("ephemeral key")?;
        Ok(ffi::peer_tmp_key(ssl).map(|key| EphemeralKey::from_pkey(&key)))
    }

    /// Whether the peer supports RFC 5746 secure renegotiation
    pub fn secure_renegotiation_support(&self) -> Result<bool> {
        let ssl = self.established_ssl("secure renegotiation support")?;
        Ok(ffi::secure_renegotiation_support(ssl))
    }
}
