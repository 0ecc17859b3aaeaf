//! In-memory transport pipe
//!
//! A `TransportPipe` is a pair of bounded byte queues linking two endpoints.
//! The engine endpoint is handed to a [`Connection`](crate::tls::Connection)
//! and carries the TLS records it produces and consumes; the caller endpoint
//! is pumped by the application against the real network.
//!
//! Nothing here ever blocks. A full queue reports [`PipeError::WouldBlock`]
//! and an empty one does the same on read. The two endpoints are owned
//! independently: dropping one marks its side released, and from then on
//! every operation on the sibling reports [`PipeError::Closed`].
//!
//! ```
//! use pipetls::pipe::{PipeError, TransportPipe};
//!
//! let (mut engine, mut caller) = TransportPipe::with_capacity(4).into_split();
//! assert_eq!(caller.write(b"hello").unwrap(), 4);
//! assert_eq!(&engine.read(16).unwrap()[..], b"hell");
//!
//! drop(engine);
//! assert_eq!(caller.read(16), Err(PipeError::Closed));
//! ```

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default per-direction capacity: one maximum-size TLS record plus overhead
pub const DEFAULT_CAPACITY: usize = 17 * 1024;

/// Pipe errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Queue empty (read) or full (write); retry after the other side moves
    #[error("operation would block")]
    WouldBlock,

    /// The sibling endpoint has been released
    #[error("transport pipe closed")]
    Closed,
}

/// Which end of the pipe an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Driven by the TLS engine
    Engine,
    /// Pumped by the application against the network
    Caller,
}

impl Side {
    fn sibling(self) -> Side {
        match self {
            Side::Engine => Side::Caller,
            Side::Caller => Side::Engine,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Engine => f.write_str("engine"),
            Side::Caller => f.write_str("caller"),
        }
    }
}

struct Shared {
    to_engine: BytesMut,
    to_caller: BytesMut,
    capacity: usize,
    engine_released: bool,
    caller_released: bool,
}

impl Shared {
    fn inbound(&mut self, side: Side) -> &mut BytesMut {
        match side {
            Side::Engine => &mut self.to_engine,
            Side::Caller => &mut self.to_caller,
        }
    }

    fn outbound(&mut self, side: Side) -> &mut BytesMut {
        self.inbound(side.sibling())
    }

    fn is_released(&self, side: Side) -> bool {
        match side {
            Side::Engine => self.engine_released,
            Side::Caller => self.caller_released,
        }
    }

    fn release(&mut self, side: Side) {
        match side {
            Side::Engine => self.engine_released = true,
            Side::Caller => self.caller_released = true,
        }
        // Nobody can read what the released side would have consumed.
        self.inbound(side).clear();
    }
}

/// A linked pair of endpoints, before they are handed to their owners
pub struct TransportPipe {
    engine: Endpoint,
    caller: Endpoint,
}

impl TransportPipe {
    /// Create a pipe with [`DEFAULT_CAPACITY`] bytes per direction
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a pipe holding at most `capacity` bytes per direction
    ///
    /// A capacity of zero is raised to one so that progress stays possible.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(Mutex::new(Shared {
            to_engine: BytesMut::with_capacity(capacity),
            to_caller: BytesMut::with_capacity(capacity),
            capacity,
            engine_released: false,
            caller_released: false,
        }));

        TransportPipe {
            engine: Endpoint {
                shared: Arc::clone(&shared),
                side: Side::Engine,
            },
            caller: Endpoint {
                shared,
                side: Side::Caller,
            },
        }
    }

    /// Split into `(engine, caller)` endpoints
    pub fn into_split(self) -> (Endpoint, Endpoint) {
        (self.engine, self.caller)
    }
}

impl Default for TransportPipe {
    fn default() -> Self {
        Self::new()
    }
}

/// One end of a [`TransportPipe`]
///
/// Each endpoint may release only its own side, which happens on drop. The
/// sibling is a distinct value with its own lifetime.
pub struct Endpoint {
    shared: Arc<Mutex<Shared>>,
    side: Side,
}

impl Endpoint {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panic while holding the lock cannot leave the queues torn.
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Which side this endpoint is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Per-direction capacity in bytes
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Whether the sibling endpoint has been released
    pub fn is_sibling_released(&self) -> bool {
        self.lock().is_released(self.side.sibling())
    }

    /// Number of bytes waiting to be read on this endpoint
    pub fn pending(&self) -> usize {
        let mut shared = self.lock();
        shared.inbound(self.side).len()
    }

    /// Number of bytes that can be written before the sibling must drain
    pub fn space(&self) -> usize {
        let mut shared = self.lock();
        let capacity = shared.capacity;
        capacity - shared.outbound(self.side).len()
    }

    /// Enqueue as much of `data` as fits, returning the count
    pub fn write(&mut self, data: &[u8]) -> Result<usize, PipeError> {
        let mut shared = self.lock();
        if shared.is_released(self.side.sibling()) {
            return Err(PipeError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let capacity = shared.capacity;
        let queue = shared.outbound(self.side);
        let room = capacity - queue.len();
        if room == 0 {
            return Err(PipeError::WouldBlock);
        }

        let n = room.min(data.len());
        queue.extend_from_slice(&data[..n]);
        log::trace!("pipe: {} side enqueued {} bytes", self.side, n);
        Ok(n)
    }

    /// Dequeue up to `max` bytes
    pub fn read(&mut self, max: usize) -> Result<Bytes, PipeError> {
        let mut shared = self.lock();
        if shared.is_released(self.side.sibling()) {
            return Err(PipeError::Closed);
        }

        let queue = shared.inbound(self.side);
        if queue.is_empty() {
            return Err(PipeError::WouldBlock);
        }

        let n = max.min(queue.len());
        Ok(queue.split_to(n).freeze())
    }

    /// Dequeue into `buf`, returning the count
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, PipeError> {
        let mut shared = self.lock();
        if shared.is_released(self.side.sibling()) {
            return Err(PipeError::Closed);
        }

        let queue = shared.inbound(self.side);
        if queue.is_empty() {
            return Err(PipeError::WouldBlock);
        }

        let n = buf.len().min(queue.len());
        buf[..n].copy_from_slice(&queue[..n]);
        queue.advance(n);
        Ok(n)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("side", &self.side)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.lock().release(self.side);
    }
}

// The engine reads and writes through these; a released sibling must surface
// as a hard I/O error rather than EOF so the classifier sees it immediately.
impl io::Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_into(buf).map_err(|e| match e {
            PipeError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            PipeError::Closed => io::Error::new(io::ErrorKind::ConnectionAborted, e),
        })
    }
}

impl io::Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Endpoint::write(self, buf).map_err(|e| match e {
            PipeError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            PipeError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, e),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
