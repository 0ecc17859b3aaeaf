//! Shared helpers for integration tests
//!
//! Certificates are generated at startup and a reference server built on
//! the OpenSSL server API sits directly on the caller endpoint of the
//! client's pipe.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{
    self, AlpnError, ErrorCode, Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions,
    SslStream, SslVerifyMode, SslVersion,
};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use pipetls::pipe::Endpoint;
use pipetls::tls::{Connection, Poll, TlsConfig, VerifyMode};

pub const CA_NAME: &str = "Pipetls Test CA";
pub const SERVER_NAME: &str = "localhost";
pub const MAX_EARLY_DATA: u32 = 16384;

/// `SSL_OP_NO_ANTI_REPLAY`: stateless tickets even with early data enabled
const NO_ANTI_REPLAY: SslOptions = SslOptions::from_bits_retain(0x0100_0000);
/// `SSL_OP_ALLOW_CLIENT_RENEGOTIATION` (OpenSSL 3 refuses it by default)
const ALLOW_CLIENT_RENEGOTIATION: SslOptions = SslOptions::from_bits_retain(0x0000_0100);

/// OCSPResponse with status unauthorized(6) and no body
pub const OCSP_UNAUTHORIZED: &[u8] = &[0x30, 0x03, 0x0a, 0x01, 0x06];

/// A CA with one server and one client certificate
pub struct TestPki {
    pub ca_cert: X509,
    pub ca_key: PKey<Private>,
    pub server_cert: X509,
    pub server_key: PKey<Private>,
    pub client_cert: X509,
    pub client_key: PKey<Private>,
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn issue(
    cn: &str,
    serial: u32,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();

    match issuer {
        None => {
            // Self-signed CA
            builder.set_issuer_name(&name).unwrap();
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
            builder.sign(key, MessageDigest::sha256()).unwrap();
        }
        Some((ca_cert, ca_key)) => {
            builder.set_issuer_name(ca_cert.subject_name()).unwrap();
            let san = SubjectAlternativeName::new()
                .dns(cn)
                .build(&builder.x509v3_context(Some(&**ca_cert), None))
                .unwrap();
            builder.append_extension(san).unwrap();
            builder.sign(ca_key, MessageDigest::sha256()).unwrap();
        }
    }

    builder.build()
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = ec_key();
        let ca_cert = issue(CA_NAME, 1, &ca_key, None);

        let server_key = ec_key();
        let server_cert = issue(SERVER_NAME, 2, &server_key, Some((&ca_cert, &ca_key)));

        let client_key = ec_key();
        let client_cert = issue("client", 3, &client_key, Some((&ca_cert, &ca_key)));

        TestPki {
            ca_cert,
            ca_key,
            server_cert,
            server_key,
            client_cert,
            client_key,
        }
    }

    /// Server identity with an RSA key, issued by the same CA
    pub fn rsa_server(&self) -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let cert = issue(SERVER_NAME, 4, &key, Some((&self.ca_cert, &self.ca_key)));
        (cert, key)
    }
}

/// Reference server settings
#[derive(Clone, Default)]
pub struct PeerOptions {
    pub version: Option<SslVersion>,
    pub cipher_list: Option<&'static str>,
    pub ciphersuites: Option<&'static str>,
    pub alpn: Vec<&'static str>,
    pub ocsp_response: Option<Vec<u8>>,
    /// Send the CA after the server certificate
    pub send_chain: bool,
    /// Send a certificate request naming the test CA
    pub request_client_cert: bool,
    /// Fail the handshake when the client sends no certificate
    pub require_client_cert: bool,
    pub early_data: bool,
    /// Early data limit advertised in tickets, `MAX_EARLY_DATA` by default
    pub max_early_data: Option<u32>,
    /// Key exchange groups, e.g. `P-256`
    pub groups: Option<&'static str>,
    /// Honour client-initiated renegotiation
    pub allow_renegotiation: bool,
    /// Certificate and key to serve instead of the EC server identity
    pub identity: Option<(X509, PKey<Private>)>,
}

pub fn server_context(pki: &TestPki, options: &PeerOptions) -> SslContext {
    let mut ctx = SslContextBuilder::new(SslMethod::tls_server()).unwrap();

    let (cert, key) = match &options.identity {
        Some((cert, key)) => (cert, key),
        None => (&pki.server_cert, &pki.server_key),
    };
    ctx.set_certificate(cert).unwrap();
    ctx.set_private_key(key).unwrap();
    ctx.check_private_key().unwrap();
    if options.send_chain {
        ctx.add_extra_chain_cert(pki.ca_cert.clone()).unwrap();
    }
    ctx.set_session_id_context(b"pipetls-tests").unwrap();

    if let Some(version) = options.version {
        ctx.set_min_proto_version(Some(version)).unwrap();
        ctx.set_max_proto_version(Some(version)).unwrap();
    }
    if let Some(list) = options.cipher_list {
        ctx.set_cipher_list(list).unwrap();
    }
    if let Some(suites) = options.ciphersuites {
        ctx.set_ciphersuites(suites).unwrap();
    }
    if let Some(groups) = options.groups {
        ctx.set_groups_list(groups).unwrap();
    }
    if options.allow_renegotiation {
        ctx.set_options(ALLOW_CLIENT_RENEGOTIATION);
    }

    if !options.alpn.is_empty() {
        let protocols: Vec<Vec<u8>> = options
            .alpn
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();

        ctx.set_alpn_select_callback(move |_ssl, client_protos| {
            // Parse client protocols (length-prefixed format)
            let mut pos = 0;
            while pos < client_protos.len() {
                let len = client_protos[pos] as usize;
                pos += 1;
                if pos + len > client_protos.len() {
                    break;
                }
                let client_proto = &client_protos[pos..pos + len];
                if protocols.iter().any(|p| p.as_slice() == client_proto) {
                    return Ok(client_proto);
                }
                pos += len;
            }
            Err(AlpnError::NOACK)
        });
    }

    if let Some(response) = options.ocsp_response.clone() {
        ctx.set_status_callback(move |ssl| {
            ssl.set_ocsp_status(&response)?;
            Ok(true)
        })
        .unwrap();
    }

    if options.request_client_cert || options.require_client_cert {
        ctx.add_client_ca(&pki.ca_cert).unwrap();
        ctx.cert_store_mut().add_cert(pki.ca_cert.clone()).unwrap();
        let mut mode = SslVerifyMode::PEER;
        if options.require_client_cert {
            mode |= SslVerifyMode::FAIL_IF_NO_PEER_CERT;
        }
        ctx.set_verify(mode);
    }

    if options.early_data {
        ctx.set_max_early_data(options.max_early_data.unwrap_or(MAX_EARLY_DATA))
            .unwrap();
        ctx.set_options(NO_ANTI_REPLAY);
    }

    ctx.build()
}

/// Client configuration that accepts the test server without verification
pub fn client_config() -> TlsConfig {
    let mut config = TlsConfig::client();
    config.set_verify_mode(VerifyMode::None);
    config
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    EarlyData,
    Handshake,
    Established,
}

/// Reference server on the caller endpoint of a client pipe
pub struct Peer {
    stream: SslStream<Endpoint>,
    phase: Phase,
    pub early_data: Vec<u8>,
}

impl Peer {
    pub fn accept(ctx: &SslContext, endpoint: Endpoint) -> Self {
        let mut ssl = Ssl::new(ctx).unwrap();
        ssl.set_accept_state();
        Peer {
            stream: SslStream::new(ssl, endpoint).unwrap(),
            phase: Phase::Handshake,
            early_data: Vec::new(),
        }
    }

    /// Read 0-RTT data before completing the handshake; without this the
    /// server skips any early data it is sent
    pub fn accept_early_data(mut self) -> Self {
        self.phase = Phase::EarlyData;
        self
    }

    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    pub fn ssl(&self) -> &ssl::SslRef {
        self.stream.ssl()
    }

    /// Make as much handshake progress as the pipe allows
    pub fn step(&mut self) -> Result<(), ssl::Error> {
        if self.phase == Phase::EarlyData {
            let mut buf = [0u8; 4096];
            loop {
                match self.stream.read_early_data(&mut buf) {
                    Ok(0) => {
                        self.phase = Phase::Handshake;
                        break;
                    }
                    Ok(n) => self.early_data.extend_from_slice(&buf[..n]),
                    Err(e) if is_retry(&e) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }

        if self.phase == Phase::Handshake {
            match self.stream.do_handshake() {
                Ok(()) => self.phase = Phase::Established,
                Err(e) if is_retry(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drain all application data currently available
    pub fn read_available(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.ssl_read(&mut buf) {
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if is_retry(&e) || e.code() == ErrorCode::ZERO_RETURN => break,
                Err(e) => panic!("server read failed: {}", e),
            }
        }
        data
    }

    pub fn write_all(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let n = self.stream.ssl_write(data).unwrap();
            data = &data[n..];
        }
    }

    /// Send close_notify; true once the client's has been received too
    pub fn shutdown(&mut self) -> bool {
        match self.stream.shutdown() {
            Ok(ssl::ShutdownResult::Received) => true,
            Ok(ssl::ShutdownResult::Sent) => false,
            Err(e) if is_retry(&e) => false,
            Err(e) => panic!("server shutdown failed: {}", e),
        }
    }
}

fn is_retry(err: &ssl::Error) -> bool {
    err.code() == ErrorCode::WANT_READ || err.code() == ErrorCode::WANT_WRITE
}

/// Drive both sides until established, returning the number of client steps
pub fn drive_handshake(client: &mut Connection, server: &mut Peer) -> usize {
    let mut rounds = 0;
    let mut client_done = false;
    for _ in 0..20 {
        if !client_done {
            rounds += 1;
            client_done = client.advance_handshake().unwrap() == Poll::Ready(());
        }
        server.step().unwrap();
        if client_done && server.is_established() {
            return rounds;
        }
    }
    panic!("handshake did not converge");
}

/// Client and server connected through one pipe
pub fn connect(config: TlsConfig, ctx: &SslContext) -> (Connection, Peer) {
    let (client, caller) = Connection::with_pipe(config).unwrap();
    let server = Peer::accept(ctx, caller);
    (client, server)
}

/// Connect and complete the handshake
pub fn established(config: TlsConfig, ctx: &SslContext) -> (Connection, Peer) {
    let (mut client, mut server) = connect(config, ctx);
    drive_handshake(&mut client, &mut server);
    (client, server)
}

/// Read until the client returns application data
pub fn client_read(client: &mut Connection) -> Vec<u8> {
    match client.read(16 * 1024).unwrap() {
        Poll::Ready(data) => data,
        other => panic!("expected data, got {:?}", other),
    }
}
