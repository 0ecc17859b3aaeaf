//! Certificate handling and parsing
//!
//! This module snapshots the peer's certificate chain and extracts summary
//! information from X.509 certificates.

use super::error::Result;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::stack::StackRef;
use openssl::x509::{X509NameRef, X509Ref, X509};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// SHA-256 of the DER encoding, lowercase hex
    pub fingerprint_sha256: String,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Result<Self> {
        let digest = cert.digest(MessageDigest::sha256())?;
        Ok(CertInfo {
            subject: get_cn(cert.subject_name()),
            issuer: get_cn(cert.issuer_name()),
            subject_alt_names: get_subject_alt_names(cert),
            fingerprint_sha256: digest.iter().map(|b| format!("{:02x}", b)).collect(),
        })
    }
}

/// Get Common Name from X509_NAME
fn get_cn(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn get_subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(v4) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", std::net::Ipv4Addr::from(v4)));
                } else if let Ok(v6) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", std::net::Ipv6Addr::from(v6)));
                }
            }
        }
    }

    names
}

/// Render a distinguished name in the engine's one-line form, e.g.
/// `/C=US/O=Example/CN=Example CA`
pub fn one_line(name: &X509NameRef) -> String {
    let mut line = String::new();
    for entry in name.entries() {
        let object = entry.object();
        let key = object
            .nid()
            .short_name()
            .map(str::to_string)
            .unwrap_or_else(|_| object.to_string());
        let value = entry
            .data()
            .to_string()
            .unwrap_or_else(|_| String::from_utf8_lossy(entry.data().as_slice()).into_owned());
        line.push('/');
        line.push_str(&key);
        line.push('=');
        line.push_str(&value);
    }
    line
}

/// The peer's certificates, leaf first, exactly as presented
///
/// Each certificate is re-encoded at extraction time, so the chain stays
/// valid after the connection is gone.
#[derive(Clone, Debug)]
pub struct PeerCertChain {
    certs: Vec<X509>,
}

impl PeerCertChain {
    pub(crate) fn snapshot(stack: &StackRef<X509>) -> Result<Self> {
        let certs = stack
            .iter()
            .map(|cert| -> Result<X509> { Ok(X509::from_der(&cert.to_der()?)?) })
            .collect::<Result<Vec<_>>>()?;
        Ok(PeerCertChain { certs })
    }

    /// The peer's own certificate
    pub fn leaf(&self) -> Option<&X509> {
        self.certs.first()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, X509> {
        self.certs.iter()
    }

    pub fn as_slice(&self) -> &[X509] {
        &self.certs
    }

    /// Summarise every certificate, leaf first
    pub fn infos(&self) -> Result<Vec<CertInfo>> {
        self.certs.iter().map(|cert| CertInfo::from_x509(cert)).collect()
    }
}

impl<'a> IntoIterator for &'a PeerCertChain {
    type Item = &'a X509;
    type IntoIter = std::slice::Iter<'a, X509>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
