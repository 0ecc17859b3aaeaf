//! Client connection engine
//!
//! A [`Connection`] runs one TLS client over the engine endpoint of a
//! [`TransportPipe`](crate::pipe::TransportPipe). It never touches a socket:
//! every operation either completes or reports which way the caller must
//! pump the pipe before calling again.
//!
//! ```no_run
//! use pipetls::tls::{Connection, Direction, Poll, TlsConfig};
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//!
//! let mut config = TlsConfig::client();
//! config.set_servername("example.com").unwrap();
//! let (mut conn, mut caller) = Connection::with_pipe(config).unwrap();
//! let mut socket = TcpStream::connect("example.com:443").unwrap();
//!
//! let mut buf = [0u8; 4096];
//! loop {
//!     let poll = conn.advance_handshake().unwrap();
//!     // Flush whatever the engine produced
//!     while let Ok(out) = caller.read(4096) {
//!         socket.write_all(&out).unwrap();
//!     }
//!     match poll {
//!         Poll::Ready(()) => break,
//!         Poll::WouldBlock(Direction::Read) => {
//!             let n = socket.read(&mut buf).unwrap();
//!             caller.write(&buf[..n]).unwrap();
//!         }
//!         Poll::WouldBlock(Direction::Write) => {}
//!         Poll::PeerClosed => return,
//!     }
//! }
//! ```

use super::capture::{CipherCapture, CipherDescriptor};
use super::cert::{one_line, PeerCertChain};
use super::classify::{classify, Poll, PollResult, RawOutcome, TransportStatus};
use super::config::TlsConfig;
use super::error::{ConfigError, Result, TlsError};
use super::ffi;
use super::handshake::HandshakeState;
use super::introspect::ProtocolVersion;
use crate::pipe::{Endpoint, Side, TransportPipe};
use openssl::error::ErrorStack;
use openssl::ssl::{self, ShutdownResult, Ssl, SslRef, SslStream};
use std::fmt;
use std::mem;

/// Progress of a [`Connection::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Our close_notify is queued; pump the pipe and call again for the peer's
    Sent,
    /// Both close_notify alerts exchanged
    Complete,
}

/// What became of data sent with [`Connection::write_early_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyDataStatus {
    /// No early data left the engine, including when the configured session
    /// could not carry any
    NotSent,
    Rejected,
    Accepted,
}

impl EarlyDataStatus {
    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => EarlyDataStatus::Rejected,
            2 => EarlyDataStatus::Accepted,
            _ => EarlyDataStatus::NotSent,
        }
    }
}

/// Facts fixed at handshake completion
#[derive(Debug, Clone)]
pub(crate) struct NegotiatedInfo {
    pub(crate) version: ProtocolVersion,
    pub(crate) cipher: Option<CipherDescriptor>,
    pub(crate) chain: Option<PeerCertChain>,
}

pub(crate) enum Engine {
    /// Not started; holds the engine endpoint
    Idle(Endpoint),
    Running(SslStream<Endpoint>),
    /// Only observable if starting failed halfway
    Detached,
}

/// One client TLS connection over an in-memory pipe
pub struct Connection {
    config: TlsConfig,
    state: HandshakeState,
    pub(crate) engine: Engine,
    pub(crate) capture: Box<dyn CipherCapture>,
    pub(crate) info: Option<NegotiatedInfo>,
    early_data_window: bool,
    early_data_sent: u32,
}

impl Connection {
    /// Bind a configuration to the engine endpoint of a pipe
    pub fn new(config: TlsConfig, endpoint: Endpoint) -> Result<Self> {
        if endpoint.side() != Side::Engine {
            return Err(TlsError::Configuration(ConfigError::WrongEndpoint));
        }
        let capture = config.capture_mode().build();
        Ok(Connection {
            config,
            state: HandshakeState::Configured,
            engine: Engine::Idle(endpoint),
            capture,
            info: None,
            early_data_window: true,
            early_data_sent: 0,
        })
    }

    /// Create a connection on a fresh pipe, returning the caller endpoint
    pub fn with_pipe(config: TlsConfig) -> Result<(Self, Endpoint)> {
        let (engine, caller) = TransportPipe::new().into_split();
        Ok((Connection::new(config, engine)?, caller))
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Mutable configuration, only before the handshake starts
    pub fn config_mut(&mut self) -> Result<&mut TlsConfig> {
        self.ensure_live()?;
        if self.state != HandshakeState::Configured {
            return Err(TlsError::InvalidState {
                operation: "config_mut",
                state: self.state,
            });
        }
        Ok(&mut self.config)
    }

    /// Run the handshake as far as the pipe allows
    ///
    /// Starts the engine on the first call. `Ready` means the connection is
    /// established.
    pub fn advance_handshake(&mut self) -> PollResult<()> {
        self.ensure_live()?;
        match self.state {
            HandshakeState::Configured => self.start()?,
            HandshakeState::Handshaking => {}
            state => {
                return Err(TlsError::InvalidState {
                    operation: "advance_handshake",
                    state,
                })
            }
        }

        self.early_data_window = false;
        let poll = self.drive("advance_handshake", |stream| stream.do_handshake())?;
        if poll.is_ready() {
            self.complete_handshake()?;
        }
        Ok(poll)
    }

    /// Encrypt application data; partial writes are allowed
    ///
    /// After `WouldBlock`, retry with the same data.
    pub fn write(&mut self, data: &[u8]) -> PollResult<usize> {
        self.require("write", &[HandshakeState::Established])?;
        if data.is_empty() {
            return Ok(Poll::Ready(0));
        }
        self.drive("write", |stream| stream.ssl_write(data))
    }

    /// Send 0-RTT data before the handshake is advanced
    ///
    /// At most the session's `max_early_data` bytes are sent over all calls;
    /// the count returned may be short, and is `Ready(0)` once that budget is
    /// spent. Without a session that allows early data nothing reaches the
    /// engine: the result is `Ready(0)` and
    /// [`early_data_status`](Self::early_data_status) stays `NotSent`.
    pub fn write_early_data(&mut self, data: &[u8]) -> PollResult<usize> {
        self.ensure_live()?;
        let early_data_allowed = match self.state {
            HandshakeState::Configured => true,
            HandshakeState::Handshaking => self.early_data_window,
            _ => false,
        };
        if !early_data_allowed {
            return Err(TlsError::InvalidState {
                operation: "write_early_data",
                state: self.state,
            });
        }

        let max_early_data = self.config.session().map_or(0, |s| s.max_early_data());
        let budget = max_early_data.saturating_sub(self.early_data_sent) as usize;
        if budget == 0 || data.is_empty() {
            return Ok(Poll::Ready(0));
        }
        let data = &data[..data.len().min(budget)];

        if self.state == HandshakeState::Configured {
            self.start()?;
        }
        let poll = self.drive("write_early_data", |stream| stream.write_early_data(data))?;
        if let Poll::Ready(n) = poll {
            self.early_data_sent += n as u32;
        }
        Ok(poll)
    }

    /// Whether the server accepted early data
    pub fn early_data_status(&self) -> Result<EarlyDataStatus> {
        self.ensure_not_errored()?;
        Ok(match &self.engine {
            Engine::Running(stream) => {
                EarlyDataStatus::from_raw(ffi::early_data_status(stream.ssl()))
            }
            _ => EarlyDataStatus::NotSent,
        })
    }

    /// Decrypt up to `max` bytes of application data
    pub fn read(&mut self, max: usize) -> PollResult<Vec<u8>> {
        self.require(
            "read",
            &[HandshakeState::Established, HandshakeState::ShuttingDown],
        )?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(max)?;
        buf.resize(max, 0);

        let poll = self.read_into(&mut buf)?;
        Ok(poll.map(move |n| {
            buf.truncate(n);
            buf
        }))
    }

    /// Decrypt application data into `buf`
    pub fn read_into(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        self.require(
            "read",
            &[HandshakeState::Established, HandshakeState::ShuttingDown],
        )?;
        if buf.is_empty() {
            return Ok(Poll::Ready(0));
        }
        self.drive("read", |stream| stream.ssl_read(buf))
    }

    /// Send close_notify and, on later calls, wait for the peer's
    pub fn shutdown(&mut self) -> PollResult<ShutdownStatus> {
        match self.state {
            HandshakeState::Closed => return Ok(Poll::Ready(ShutdownStatus::Complete)),
            HandshakeState::Errored => return Err(TlsError::AlreadyTerminated(self.state)),
            HandshakeState::Established | HandshakeState::ShuttingDown => {}
            state => {
                return Err(TlsError::InvalidState {
                    operation: "shutdown",
                    state,
                })
            }
        }

        let poll = self.drive("shutdown", |stream| stream.shutdown())?;
        Ok(match poll {
            Poll::Ready(ShutdownResult::Sent) => {
                self.set_state(HandshakeState::ShuttingDown);
                Poll::Ready(ShutdownStatus::Sent)
            }
            Poll::Ready(ShutdownResult::Received) => {
                self.set_state(HandshakeState::Closed);
                Poll::Ready(ShutdownStatus::Complete)
            }
            Poll::WouldBlock(direction) => Poll::WouldBlock(direction),
            Poll::PeerClosed => Poll::PeerClosed,
        })
    }

    /// Ask the peer for a new handshake
    ///
    /// On success the connection is back in `Handshaking` and must be driven
    /// with [`advance_handshake`](Self::advance_handshake). TLS 1.3 has no
    /// renegotiation; the engine refuses and the connection stays usable.
    pub fn renegotiate(&mut self) -> Result<()> {
        self.require("renegotiate", &[HandshakeState::Established])?;
        let Engine::Running(stream) = &self.engine else {
            return Err(self.invalid_state("renegotiate"));
        };

        if !ffi::renegotiate(stream.ssl()) {
            let source = ErrorStack::get();
            log::debug!("renegotiation refused: {}", source);
            return Err(TlsError::Unsupported {
                operation: "renegotiate",
                source,
            });
        }

        self.capture.reset();
        self.info = None;
        self.set_state(HandshakeState::Handshaking);
        Ok(())
    }

    /// Decrypted bytes buffered inside the engine
    pub fn pending_bytes(&self) -> Result<usize> {
        self.ensure_not_errored()?;
        Ok(match &self.engine {
            Engine::Running(stream) => stream.ssl().pending(),
            _ => 0,
        })
    }

    /// The engine's long description of its handshake state
    pub fn state_string(&self) -> Result<String> {
        self.with_ssl(|ssl| ssl.state_string_long().to_string())
    }

    /// Enabled cipher names in priority order
    pub fn cipher_list(&self) -> Result<Vec<String>> {
        self.with_ssl(ffi::cipher_list)
    }

    /// The running engine, or a scratch one built from the configuration
    fn with_ssl<R>(&self, f: impl FnOnce(&SslRef) -> R) -> Result<R> {
        match &self.engine {
            Engine::Running(stream) => Ok(f(stream.ssl())),
            _ => {
                let ctx = self.config.build_context()?;
                let mut ssl = Ssl::new(&ctx)?;
                ssl.set_connect_state();
                Ok(f(&ssl))
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        if !matches!(self.engine, Engine::Idle(_)) {
            return Err(self.invalid_state("start"));
        }

        let ctx = self.config.build_context()?;
        let mut ssl = Ssl::new(&ctx)?;
        ssl.set_connect_state();
        self.config.apply_to(&mut ssl)?;

        let Engine::Idle(endpoint) = mem::replace(&mut self.engine, Engine::Detached) else {
            return Err(self.invalid_state("start"));
        };
        self.engine = Engine::Running(SslStream::new(ssl, endpoint)?);
        self.set_state(HandshakeState::Handshaking);
        Ok(())
    }

    fn complete_handshake(&mut self) -> Result<()> {
        let Engine::Running(stream) = &self.engine else {
            return Err(self.invalid_state("advance_handshake"));
        };
        let ssl = stream.ssl();
        self.capture.observe(ssl);

        let version = ProtocolVersion::from_ssl(ssl);
        let cipher = self
            .capture
            .captured()
            .cloned()
            .or_else(|| ssl.current_cipher().map(CipherDescriptor::from_cipher));
        let chain = ssl.peer_cert_chain().map(PeerCertChain::snapshot).transpose()?;

        log::debug!(
            "handshake complete: {} {}{}",
            version.name,
            cipher.as_ref().map_or("<none>", |c| c.name.as_str()),
            if ssl.session_reused() { " (resumed)" } else { "" }
        );

        self.info = Some(NegotiatedInfo {
            version,
            cipher,
            chain,
        });
        self.set_state(HandshakeState::Established);
        Ok(())
    }

    /// Run one engine call and classify its outcome
    fn drive<T>(
        &mut self,
        operation: &'static str,
        call: impl FnOnce(&mut SslStream<Endpoint>) -> std::result::Result<T, ssl::Error>,
    ) -> PollResult<T> {
        let Engine::Running(stream) = &mut self.engine else {
            return Err(self.invalid_state(operation));
        };

        let raw = RawOutcome::from(call(stream));
        if self.state == HandshakeState::Handshaking {
            self.capture.observe(stream.ssl());
        }
        let transport = if stream.get_ref().is_sibling_released() {
            TransportStatus::Released
        } else {
            TransportStatus::Open
        };

        let mut result = classify(raw, transport);
        if let Err(TlsError::ClientCertificateRequested(issuers)) = &mut result {
            *issuers = ffi::client_ca_names(stream.ssl())
                .into_iter()
                .map(one_line)
                .collect();
        }
        match &result {
            Ok(poll) => log::trace!("{}: {:?}", operation, poll.as_ref().map(|_| ())),
            Err(TlsError::Fatal(fatal)) => {
                log::debug!("{} failed: {}", operation, fatal);
                self.set_state(HandshakeState::Errored);
            }
            Err(err) => log::debug!("{}: {}", operation, err),
        }
        result
    }

    fn set_state(&mut self, state: HandshakeState) {
        if self.state != state {
            log::debug!("connection state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn invalid_state(&self, operation: &'static str) -> TlsError {
        TlsError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(TlsError::AlreadyTerminated(self.state));
        }
        Ok(())
    }

    pub(crate) fn ensure_not_errored(&self) -> Result<()> {
        if self.state == HandshakeState::Errored {
            return Err(TlsError::AlreadyTerminated(self.state));
        }
        Ok(())
    }

    fn require(&self, operation: &'static str, allowed: &[HandshakeState]) -> Result<()> {
        self.ensure_live()?;
        if !allowed.contains(&self.state) {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("pending_bytes", &self.pending_bytes().ok())
            .finish()
    }
}
