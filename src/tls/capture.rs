//! Negotiation-time cipher capture
//!
//! The engine's post-handshake cipher accessor is empty whenever the
//! handshake dies after the ServerHello, for example on a certificate
//! verification failure. A [`CipherCapture`] watches the engine after every
//! handshake step and remembers the cipher as soon as one is pending, so
//! [`Connection::cipher`](super::Connection::cipher) can still answer.
//!
//! Capture is best effort. [`NoCapture`] is the degraded mode where only the
//! post-handshake accessor is consulted.

use super::ffi;
use openssl::ssl::{SslCipherRef, SslRef};
use std::fmt;

/// Description of a cipher suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherDescriptor {
    /// OpenSSL name, e.g. `ECDHE-RSA-AES128-GCM-SHA256`
    pub name: String,
    /// RFC name, e.g. `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`
    pub standard_name: Option<String>,
    /// Protocol version that introduced the suite, e.g. `TLSv1.2`
    pub version: String,
    /// Secret key bits
    pub bits: i32,
    /// IANA identifier
    pub protocol_id: u16,
    /// One-line summary (key exchange, authentication, encryption, MAC)
    pub description: String,
}

impl CipherDescriptor {
    pub fn from_cipher(cipher: &SslCipherRef) -> Self {
        CipherDescriptor {
            name: cipher.name().to_string(),
            standard_name: ffi::cipher_standard_name(cipher),
            version: cipher.version().to_string(),
            bits: cipher.bits().secret,
            protocol_id: ffi::cipher_protocol_id(cipher),
            description: cipher.description().trim().to_string(),
        }
    }

    /// Identifier as the two bytes sent on the wire
    pub fn protocol_id_bytes(&self) -> [u8; 2] {
        self.protocol_id.to_be_bytes()
    }
}

impl fmt::Display for CipherDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bits)", self.name, self.version, self.bits)
    }
}

/// Which capture implementation a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Observe the engine after each handshake step
    #[default]
    PerStep,
    /// Post-handshake accessor only
    Disabled,
}

impl CaptureMode {
    pub(crate) fn build(self) -> Box<dyn CipherCapture> {
        match self {
            CaptureMode::PerStep => Box::new(StepCapture::default()),
            CaptureMode::Disabled => Box::new(NoCapture),
        }
    }
}

/// Remembers the cipher chosen during negotiation
pub trait CipherCapture: Send {
    /// Look at the engine after a handshake step
    fn observe(&mut self, ssl: &SslRef);

    /// Cipher seen so far, if any
    fn captured(&self) -> Option<&CipherDescriptor>;

    /// Forget everything (new handshake)
    fn reset(&mut self);
}

/// Captures the pending cipher after each handshake step
#[derive(Debug, Default)]
pub struct StepCapture {
    cipher: Option<CipherDescriptor>,
}

impl CipherCapture for StepCapture {
    fn observe(&mut self, ssl: &SslRef) {
        // The pending cipher is set once the ServerHello is processed and
        // survives a later abort; the current one only after completion.
        let Some(cipher) = ffi::pending_cipher(ssl).or_else(|| ssl.current_cipher()) else {
            return;
        };

        let changed = match &self.cipher {
            Some(seen) => seen.protocol_id != ffi::cipher_protocol_id(cipher),
            None => true,
        };
        if changed {
            let descriptor = CipherDescriptor::from_cipher(cipher);
            log::trace!("captured negotiated cipher {}", descriptor.name);
            self.cipher = Some(descriptor);
        }
    }

    fn captured(&self) -> Option<&CipherDescriptor> {
        self.cipher.as_ref()
    }

    fn reset(&mut self) {
        self.cipher = None;
    }
}

/// Degraded mode: never captures anything
#[derive(Debug, Default)]
pub struct NoCapture;

impl CipherCapture for NoCapture {
    fn observe(&mut self, _ssl: &SslRef) {}

    fn captured(&self) -> Option<&CipherDescriptor> {
        None
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ssl::{Ssl, SslContext, SslMethod};

    #[test]
    fn test_nothing_captured_before_negotiation() {
        let ctx = SslContext::builder(SslMethod::tls_client()).unwrap().build();
        let ssl = Ssl::new(&ctx).unwrap();

        let mut capture = CaptureMode::PerStep.build();
        capture.observe(&ssl);
        assert!(capture.captured().is_none());
    }

    #[test]
    fn test_no_capture_is_inert() {
        let mut capture = CaptureMode::Disabled.build();
        let ctx = SslContext::builder(SslMethod::tls_client()).unwrap().build();
        let ssl = Ssl::new(&ctx).unwrap();
        capture.observe(&ssl);
        capture.reset();
        assert!(capture.captured().is_none());
    }

    #[test]
    fn test_protocol_id_bytes() {
        let descriptor = CipherDescriptor {
            name: "ECDHE-RSA-AES128-GCM-SHA256".to_string(),
            standard_name: Some("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string()),
            version: "TLSv1.2".to_string(),
            bits: 128,
            protocol_id: 0xC02F,
            description: String::new(),
        };
        assert_eq!(descriptor.protocol_id_bytes(), [0xC0, 0x2F]);
        assert_eq!(
            descriptor.to_string(),
            "ECDHE-RSA-AES128-GCM-SHA256 (TLSv1.2, 128 bits)"
        );
    }

    #[test]
    fn test_default_mode() {
        assert_eq!(CaptureMode::default(), CaptureMode::PerStep);
    }
}
