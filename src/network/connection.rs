//! Connection Handler
//!
//! Handles the client connection that owns the control channel.

use std::io::{BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;

use crate::engine::{AttachmentId, Engine, Outbound};
use crate::error::{Result, StubError};
use crate::protocol::{FrameDecoder, Message};

/// A recoverable error observed while serving a connection
#[derive(Debug)]
pub struct Fault {
    /// Peer the offending frame came from
    pub peer: String,

    /// What went wrong with that frame or message
    pub error: StubError,
}

/// Write half of a client connection
///
/// Shared between the connection's own loop (responses) and the engine
/// (unsolicited pushes); the mutex keeps frames from interleaving.
pub struct StreamWriter {
    writer: Mutex<BufWriter<TcpStream>>,

    /// Separate handle so `close` never waits behind a blocked write
    control: TcpStream,

    peer_addr: String,
}

impl Outbound for StreamWriter {
    fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(frame)?;
        writer.flush()
    }

    fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        self.peer_addr.clone()
    }
}

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader
    reader: TcpStream,

    /// Shared writer, also registered with the engine
    writer: Arc<StreamWriter>,

    /// Reference to the emulated device
    engine: Arc<Engine>,

    /// Carry-over buffer for split frames
    decoder: FrameDecoder,

    /// Where recoverable faults are reported
    faults: Sender<Fault>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, engine: Arc<Engine>, faults: Sender<Fault>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let writer = Arc::new(StreamWriter {
            writer: Mutex::new(BufWriter::new(stream.try_clone()?)),
            control: stream.try_clone()?,
            peer_addr: peer_addr.clone(),
        });

        Ok(Self {
            reader: stream,
            writer,
            decoder: engine.codec().decoder(),
            engine,
            faults,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 disables)
    pub fn set_timeouts(&mut self, idle_ms: u64, write_ms: u64) -> Result<()> {
        if idle_ms > 0 {
            self.reader
                .set_read_timeout(Some(Duration::from_millis(idle_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .control
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }

        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Takes ownership of the control channel first; if the engine refuses
    /// (busy or closed) the socket is closed and the error returned.
    pub fn handle(&mut self) -> Result<()> {
        let _attachment = AttachmentGuard::acquire(&self.engine, self.writer.clone())?;

        tracing::debug!("Connection established from {}", self.peer_addr);

        self.serve()
    }

    /// Read/decode/respond loop
    fn serve(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];

        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    // WouldBlock on Unix, TimedOut on Windows
                    tracing::debug!("Idle timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) if is_disconnect(e.kind()) => {
                    tracing::debug!("Connection to {} dropped: {}", self.peer_addr, e);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    return Err(e.into());
                }
            };

            // Frames from one read are answered in arrival order before the next read
            for decoded in self.decoder.decode(&buf[..n]) {
                let request = match decoded {
                    Ok(request) => request,
                    Err(e) => {
                        self.report(e);
                        continue;
                    }
                };

                tracing::trace!(
                    "Received {} seq={} from {}",
                    request.command,
                    request.sequence,
                    self.peer_addr
                );

                match self.engine.respond(&request, |responses| self.send_all(&responses)) {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                    Err(e) => self.report(e),
                }
            }
        }
    }

    /// Write responses; `Ok(false)` means the client went away
    fn send_all(&self, responses: &[Message]) -> Result<bool> {
        for response in responses {
            let bytes = self.engine.codec().encode(response)?;

            if let Err(e) = self.writer.send(&bytes) {
                if is_disconnect(e.kind()) {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.peer_addr,
                        e
                    );
                    return Ok(false);
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e.into());
            }
        }
        Ok(true)
    }

    /// Log a recoverable fault and hand it to the host
    fn report(&self, error: StubError) {
        tracing::warn!("Dropped frame from {}: {}", self.peer_addr, error);

        let fault = Fault {
            peer: self.peer_addr.clone(),
            error,
        };
        if let Err(TrySendError::Full(fault)) = self.faults.try_send(fault) {
            tracing::warn!("Fault queue full, discarding: {}", fault.error);
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Ownership of the control channel for one connection
///
/// Detaches from the engine and closes the socket when dropped, whether
/// `serve` returned or unwound.
struct AttachmentGuard {
    engine: Arc<Engine>,
    outbound: Arc<dyn Outbound>,
    id: AttachmentId,
}

impl AttachmentGuard {
    /// Attach `outbound`; a refused connection is closed straight away
    fn acquire(engine: &Arc<Engine>, outbound: Arc<dyn Outbound>) -> Result<Self> {
        match engine.attach(outbound.clone()) {
            Ok(id) => Ok(Self {
                engine: Arc::clone(engine),
                outbound,
                id,
            }),
            Err(e) => {
                outbound.close();
                Err(e)
            }
        }
    }
}

impl Drop for AttachmentGuard {
    fn drop(&mut self) {
        self.engine.detach(self.id);
        self.outbound.close();
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}
