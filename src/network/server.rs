//! TCP Server
//!
//! Accepts control connections and runs the discovery emitter.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use super::{Connection, DiscoveryEmitter, Fault};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, StubError};

/// How often the accept loop checks for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Faults buffered for the host before new ones are dropped
const FAULT_CAPACITY: usize = 256;

/// Network front end of the emulated device
///
/// Owns the listening socket (inside the acceptor thread), the connection
/// threads and the discovery emitter. `shutdown` releases all of them and
/// runs on drop, so start/stop cycles never leak sockets or timers.
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
    discovery: Option<DiscoveryEmitter>,
    fault_tx: Sender<Fault>,
    fault_rx: Receiver<Fault>,
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        let (fault_tx, fault_rx) = bounded(FAULT_CAPACITY);

        Self {
            config,
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            acceptor: None,
            discovery: None,
            fault_tx,
            fault_rx,
        }
    }

    /// Bind the listener, start accepting and start discovery
    ///
    /// Returns the bound address. Calling it while running returns the
    /// existing address without binding again.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let listener = TcpListener::bind((self.config.bind_host, self.config.listen_port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let discovery = if self.config.discovery_enabled {
            let mut emitter = DiscoveryEmitter::new(&self.config)?;
            emitter.start()?;
            Some(emitter)
        } else {
            None
        };

        self.engine.reopen();
        self.shutdown.store(false, Ordering::SeqCst);

        let acceptor = Acceptor {
            listener,
            engine: Arc::clone(&self.engine),
            shutdown: Arc::clone(&self.shutdown),
            faults: self.fault_tx.clone(),
            idle_timeout_ms: self.config.idle_timeout_ms,
            write_timeout_ms: self.config.write_timeout_ms,
        };

        let handle = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || acceptor.run())?;

        tracing::info!(
            "Device {} listening on {}",
            self.engine.identity().id,
            addr
        );

        self.acceptor = Some(handle);
        self.discovery = discovery;
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Start the server and block until another thread triggers shutdown
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait();
        Ok(())
    }

    /// Block until the accept loop exits, then release everything
    pub fn wait(&mut self) {
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        self.release();
    }

    /// Signal shutdown and wait for every thread and socket to be released
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wait();
    }

    fn release(&mut self) {
        if let Some(mut discovery) = self.discovery.take() {
            discovery.stop();
        }
        if self.local_addr.take().is_some() {
            tracing::info!("Server stopped");
        }
    }

    /// Flag another thread can set to stop a blocking `run`
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Recoverable faults observed on connections
    pub fn faults(&self) -> Receiver<Fault> {
        self.fault_rx.clone()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_some()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept loop state, moved into the acceptor thread
struct Acceptor {
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: Arc<AtomicBool>,
    faults: Sender<Fault>,
    idle_timeout_ms: u64,
    write_timeout_ms: u64,
}

impl Acceptor {
    fn run(self) {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    workers.retain(|worker| !worker.is_finished());
                    match self.spawn_connection(stream, peer) {
                        Ok(worker) => workers.push(worker),
                        Err(e) => tracing::warn!("Failed to set up connection from {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        // Release the port before tearing down connections
        drop(self.listener);
        self.engine.close();

        for worker in workers {
            let _ = worker.join();
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<JoinHandle<()>> {
        // Accepted sockets inherit non-blocking mode on some platforms
        stream.set_nonblocking(false)?;

        let mut connection = Connection::new(stream, Arc::clone(&self.engine), self.faults.clone())?;
        connection.set_timeouts(self.idle_timeout_ms, self.write_timeout_ms)?;

        let worker = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || match connection.handle() {
                Ok(()) => {}
                Err(StubError::Busy(reason)) => {
                    tracing::info!("Rejected {}: {}", connection.peer_addr(), reason)
                }
                Err(StubError::Closed) => {}
                Err(e) => tracing::warn!("Connection {} failed: {}", connection.peer_addr(), e),
            })?;

        Ok(worker)
    }
}
