//! Stapled OCSP responses

use super::cert::PeerCertChain;
use super::error::Result;
use openssl::ocsp::{OcspBasicResponse, OcspResponse, OcspResponseStatus};
use std::fmt;

/// OCSP response stapled to the server's certificate
///
/// The peer chain is snapshotted together with the response so the two can
/// be checked against each other later.
pub struct StapledOcsp {
    response: OcspResponse,
    der: Vec<u8>,
    chain: Option<PeerCertChain>,
}

impl StapledOcsp {
    pub(crate) fn parse(der: &[u8], chain: Option<PeerCertChain>) -> Result<Self> {
        Ok(StapledOcsp {
            response: OcspResponse::from_der(der)?,
            der: der.to_vec(),
            chain,
        })
    }

    pub fn response(&self) -> &OcspResponse {
        &self.response
    }

    /// Raw response as received
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Peer chain at the moment the response was extracted
    pub fn chain(&self) -> Option<&PeerCertChain> {
        self.chain.as_ref()
    }

    pub fn status(&self) -> OcspResponseStatus {
        self.response.status()
    }

    /// RFC 6960 name of the response status
    pub fn status_name(&self) -> &'static str {
        match self.status().as_raw() {
            0 => "successful",
            1 => "malformedRequest",
            2 => "internalError",
            3 => "tryLater",
            5 => "sigRequired",
            6 => "unauthorized",
            _ => "unknown",
        }
    }

    /// Signed payload; only present when the status is successful
    pub fn basic(&self) -> Result<OcspBasicResponse> {
        Ok(self.response.basic()?)
    }
}

impl fmt::Debug for StapledOcsp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StapledOcsp")
            .field("status", &self.status_name())
            .field("len", &self.der.len())
            .field("chain", &self.chain.as_ref().map(PeerCertChain::len))
            .finish()
    }
}
