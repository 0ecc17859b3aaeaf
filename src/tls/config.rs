//! Client TLS configuration
//!
//! A [`TlsConfig`] is a plain value: setters validate their input eagerly
//! and a rejected value leaves the previous setting in place. Nothing reaches
//! the engine until the owning [`Connection`](super::Connection) starts its
//! handshake, at which point the configuration is frozen.

use super::capture::CaptureMode;
use super::error::{ConfigError, Result, TlsError};
use super::ffi;
use super::session::Session;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{
    SslContext, SslContextBuilder, SslMethod, SslMode, SslOptions, SslRef, SslVerifyMode,
    SslVersion, StatusType,
};
use openssl::x509::X509;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Status type for OCSP stapling requests
pub const STATUS_TYPE_OCSP: i32 = 1;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// SSL 3.0 (deprecated, rarely compiled in)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Map a protocol version number as found on the wire
    pub fn from_wire(version: u16) -> Option<Self> {
        match version {
            0x0300 => Some(TlsVersion::Ssl3),
            0x0301 => Some(TlsVersion::Tls10),
            0x0302 => Some(TlsVersion::Tls11),
            0x0303 => Some(TlsVersion::Tls12),
            0x0304 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }

    /// Protocol version number as found on the wire
    pub fn wire_version(&self) -> u16 {
        match self {
            TlsVersion::Ssl3 => 0x0300,
            TlsVersion::Tls10 => 0x0301,
            TlsVersion::Tls11 => 0x0302,
            TlsVersion::Tls12 => 0x0303,
            TlsVersion::Tls13 => 0x0304,
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Map an OpenSSL protocol version constant
    pub fn from_openssl(version: SslVersion) -> Option<Self> {
        [
            TlsVersion::Ssl3,
            TlsVersion::Tls10,
            TlsVersion::Tls11,
            TlsVersion::Tls12,
            TlsVersion::Tls13,
        ]
        .into_iter()
        .find(|v| v.to_openssl_version() == version)
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; accepts the engine's names (`TLSv1.2`) and the
/// short forms (`tls1.2`)
impl FromStr for TlsVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, ConfigError> {
        match s.to_uppercase().as_str() {
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(ConfigError::UnknownVersion(s.to_string())),
        }
    }
}

/// Peer certificate verification mode
///
/// The discriminants are the engine's raw flag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Accept any peer certificate
    None = 0,
    /// Verify the peer certificate and fail the handshake if it does not verify
    Peer = 1,
    /// Fail if the peer sends no certificate (meaningful for servers only)
    FailIfNoPeerCert = 2,
    /// Only request a client certificate on the initial handshake
    ClientOnce = 4,
}

impl VerifyMode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    fn to_openssl(self) -> SslVerifyMode {
        SslVerifyMode::from_bits_retain(self.as_raw())
    }
}

impl TryFrom<i32> for VerifyMode {
    type Error = ConfigError;

    fn try_from(raw: i32) -> std::result::Result<Self, ConfigError> {
        match raw {
            0 => Ok(VerifyMode::None),
            1 => Ok(VerifyMode::Peer),
            2 => Ok(VerifyMode::FailIfNoPeerCert),
            4 => Ok(VerifyMode::ClientOnce),
            other => Err(ConfigError::InvalidVerifyMode(other)),
        }
    }
}

/// Client connection settings
#[derive(Clone)]
pub struct TlsConfig {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    verify_mode: VerifyMode,
    servername: Option<String>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
    sigalgs: Option<String>,
    options: SslOptions,
    session: Option<Session>,
    request_ocsp: bool,
    alpn: Vec<String>,
    trusted: Vec<X509>,
    client_cert: Option<(X509, PKey<Private>)>,
    report_client_cert_request: bool,
    capture_mode: CaptureMode,
}

impl TlsConfig {
    /// Create a client configuration
    ///
    /// Defaults: any protocol version the engine allows, peer verification
    /// on with an empty trust store, engine default ciphers, no SNI.
    pub fn client() -> Self {
        TlsConfig {
            min_version: None,
            max_version: None,
            verify_mode: VerifyMode::Peer,
            servername: None,
            cipher_list: None,
            ciphersuites: None,
            sigalgs: None,
            options: SslOptions::empty(),
            session: None,
            request_ocsp: false,
            alpn: Vec::new(),
            trusted: Vec::new(),
            client_cert: None,
            report_client_cert_request: false,
            capture_mode: CaptureMode::default(),
        }
    }

    /// Set TLS version (both min and max)
    pub fn set_version(&mut self, version: TlsVersion) -> &mut Self {
        self.min_version = Some(version);
        self.max_version = Some(version);
        self
    }

    /// Set TLS version range
    pub fn set_version_range(&mut self, min: TlsVersion, max: TlsVersion) -> Result<&mut Self> {
        if min > max {
            return Err(reject(ConfigError::InvalidVersionRange {
                min: min.as_str(),
                max: max.as_str(),
            }));
        }
        self.min_version = Some(min);
        self.max_version = Some(max);
        Ok(self)
    }

    pub fn set_verify_mode(&mut self, mode: VerifyMode) -> &mut Self {
        self.verify_mode = mode;
        self
    }

    /// Set the verify mode from the engine's raw flag value
    pub fn set_verify_mode_raw(&mut self, raw: i32) -> Result<&mut Self> {
        let mode = VerifyMode::try_from(raw).map_err(reject)?;
        Ok(self.set_verify_mode(mode))
    }

    /// Set SNI servername
    pub fn set_servername(&mut self, name: &str) -> Result<&mut Self> {
        validate_servername(name).map_err(reject)?;
        self.servername = Some(name.to_string());
        Ok(self)
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn set_cipher_list(&mut self, ciphers: &str) -> Result<&mut Self> {
        let mut scratch = SslContextBuilder::new(SslMethod::tls_client())?;
        scratch.set_cipher_list(ciphers).map_err(|source| {
            reject(ConfigError::InvalidCipherList {
                list: ciphers.to_string(),
                source,
            })
        })?;
        self.cipher_list = Some(ciphers.to_string());
        Ok(self)
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn set_ciphersuites(&mut self, suites: &str) -> Result<&mut Self> {
        let mut scratch = SslContextBuilder::new(SslMethod::tls_client())?;
        scratch.set_ciphersuites(suites).map_err(|source| {
            reject(ConfigError::InvalidCipherSuites {
                list: suites.to_string(),
                source,
            })
        })?;
        self.ciphersuites = Some(suites.to_string());
        Ok(self)
    }

    /// Restrict the signature algorithms offered to the server
    ///
    /// Colon-separated `algorithm+digest` pairs or scheme names, e.g.
    /// `ECDSA+SHA256:RSA-PSS+SHA256` or `ed25519`.
    pub fn set_sigalgs(&mut self, sigalgs: &str) -> Result<&mut Self> {
        let mut scratch = SslContextBuilder::new(SslMethod::tls_client())?;
        scratch.set_sigalgs_list(sigalgs).map_err(|source| {
            reject(ConfigError::InvalidSigalgs {
                list: sigalgs.to_string(),
                source,
            })
        })?;
        self.sigalgs = Some(sigalgs.to_string());
        Ok(self)
    }

    /// Add engine option flags; they are passed through untouched
    pub fn set_options(&mut self, options: SslOptions) -> &mut Self {
        self.options.insert(options);
        self
    }

    /// Do not offer or accept session tickets
    pub fn disable_session_tickets(&mut self) -> &mut Self {
        self.set_options(SslOptions::NO_TICKET)
    }

    /// Resume this session on the next handshake
    pub fn set_session(&mut self, session: Session) -> &mut Self {
        self.session = Some(session);
        self
    }

    /// Request a certificate status response of the given type
    pub fn set_status_type(&mut self, status_type: i32) -> Result<&mut Self> {
        if status_type != STATUS_TYPE_OCSP {
            return Err(reject(ConfigError::InvalidStatusType(status_type)));
        }
        self.request_ocsp = true;
        Ok(self)
    }

    /// Request a stapled OCSP response
    pub fn request_ocsp(&mut self) -> &mut Self {
        self.request_ocsp = true;
        self
    }

    /// Set ALPN protocols, most preferred first
    pub fn set_alpn(&mut self, protocols: &[&str]) -> Result<&mut Self> {
        if protocols.is_empty() {
            return Err(reject(ConfigError::InvalidAlpn("empty protocol list".to_string())));
        }
        if let Some(bad) = protocols.iter().find(|p| p.is_empty() || p.len() > 255) {
            return Err(reject(ConfigError::InvalidAlpn(format!(
                "protocol {:?} must be 1 to 255 bytes",
                bad
            ))));
        }
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        Ok(self)
    }

    /// Trust this certificate when verifying the peer
    pub fn add_trusted_certificate(&mut self, cert: X509) -> &mut Self {
        self.trusted.push(cert);
        self
    }

    /// Present this certificate when the server asks for one
    pub fn set_client_certificate(&mut self, cert: X509, key: PKey<Private>) -> Result<&mut Self> {
        let cert_key = cert.public_key()?;
        if !key.public_eq(&cert_key) {
            return Err(reject(ConfigError::Certificate(
                "private key does not match certificate".to_string(),
            )));
        }
        self.client_cert = Some((cert, key));
        Ok(self)
    }

    /// Load client certificate and private key from one PEM buffer
    pub fn set_client_certificate_pem(&mut self, pem: &[u8]) -> Result<&mut Self> {
        let cert = X509::from_pem(pem).map_err(|e| {
            reject(ConfigError::Certificate(format!(
                "Failed to load certificate: {}",
                e
            )))
        })?;
        let key = PKey::private_key_from_pem(pem).map_err(|e| {
            reject(ConfigError::Certificate(format!(
                "Failed to load private key: {}",
                e
            )))
        })?;
        self.set_client_certificate(cert, key)
    }

    /// Stop the handshake with [`TlsError::ClientCertificateRequested`]
    /// when the server asks for a certificate and none is configured
    ///
    /// Off by default: the engine then answers with an empty certificate
    /// and lets the server decide.
    pub fn report_client_cert_request(&mut self, enabled: bool) -> &mut Self {
        self.report_client_cert_request = enabled;
        self
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) -> &mut Self {
        self.capture_mode = mode;
        self
    }

    pub fn min_version(&self) -> Option<TlsVersion> {
        self.min_version
    }

    pub fn max_version(&self) -> Option<TlsVersion> {
        self.max_version
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    pub fn cipher_list(&self) -> Option<&str> {
        self.cipher_list.as_deref()
    }

    pub fn ciphersuites(&self) -> Option<&str> {
        self.ciphersuites.as_deref()
    }

    pub fn sigalgs(&self) -> Option<&str> {
        self.sigalgs.as_deref()
    }

    pub fn options(&self) -> SslOptions {
        self.options
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn ocsp_requested(&self) -> bool {
        self.request_ocsp
    }

    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn
    }

    pub fn reports_client_cert_request(&self) -> bool {
        self.report_client_cert_request
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    /// Build the engine context for one connection
    pub(crate) fn build_context(&self) -> Result<SslContext> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;

        ctx.set_min_proto_version(self.min_version.map(|v| v.to_openssl_version()))?;
        ctx.set_max_proto_version(self.max_version.map(|v| v.to_openssl_version()))?;
        ctx.set_verify(self.verify_mode.to_openssl());
        ctx.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);
        if !self.options.is_empty() {
            ctx.set_options(self.options);
        }

        if let Some(list) = &self.cipher_list {
            ctx.set_cipher_list(list)?;
        }
        if let Some(suites) = &self.ciphersuites {
            ctx.set_ciphersuites(suites)?;
        }
        if let Some(sigalgs) = &self.sigalgs {
            ctx.set_sigalgs_list(sigalgs)?;
        }

        if !self.alpn.is_empty() {
            ctx.set_alpn_protos(&encode_alpn(&self.alpn))?;
        }

        for cert in &self.trusted {
            ctx.cert_store_mut().add_cert(cert.clone())?;
        }

        if let Some((cert, key)) = &self.client_cert {
            ctx.set_certificate(cert)?;
            ctx.set_private_key(key)?;
            ctx.check_private_key()?;
        } else if self.report_client_cert_request {
            ffi::defer_client_certificate(&mut ctx);
        }

        Ok(ctx.build())
    }

    /// Apply per-connection settings to a fresh engine object
    pub(crate) fn apply_to(&self, ssl: &mut SslRef) -> Result<()> {
        if let Some(name) = &self.servername {
            ssl.set_hostname(name)?;
        }
        if self.request_ocsp {
            ssl.set_status_type(StatusType::OCSP)?;
        }
        if let Some(session) = &self.session {
            let copy = session.for_connection()?;
            // SAFETY: the session was produced by a client context using the
            // same method as the one `ssl` was created from.
            unsafe { ssl.set_session(&copy)? };
        }
        Ok(())
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::client()
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("verify_mode", &self.verify_mode)
            .field("servername", &self.servername)
            .field("cipher_list", &self.cipher_list)
            .field("ciphersuites", &self.ciphersuites)
            .field("sigalgs", &self.sigalgs)
            .field("options", &self.options)
            .field("session", &self.session.is_some())
            .field("request_ocsp", &self.request_ocsp)
            .field("alpn", &self.alpn)
            .field("trusted", &self.trusted.len())
            .field("client_cert", &self.client_cert.is_some())
            .field("report_client_cert_request", &self.report_client_cert_request)
            .field("capture_mode", &self.capture_mode)
            .finish()
    }
}

fn reject(err: ConfigError) -> TlsError {
    log::debug!("configuration rejected: {}", err);
    TlsError::Configuration(err)
}

fn validate_servername(name: &str) -> std::result::Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidServerName(name.to_string());

    if name.is_empty() || name.len() > 255 || !name.is_ascii() {
        return Err(invalid());
    }
    if name.contains('\0') || name.starts_with('.') {
        return Err(invalid());
    }
    if name.parse::<IpAddr>().is_ok() {
        return Err(invalid());
    }
    Ok(())
}

/// Encode ALPN protocols (length-prefixed)
fn encode_alpn(protocols: &[String]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    wire
}
