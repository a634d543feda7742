//! Discovery Emitter
//!
//! Periodically broadcasts a fixed DP_QUERY announcement over UDP so that
//! clients can find the device without knowing its address.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, tick, Sender};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{Cipher, CommandType, DiscoveryPayload, FrameCodec, Message, Payload};

/// Owned broadcast task with an explicit start/stop lifecycle
///
/// Holds at most one worker thread; `start` while running is a no-op and
/// dropping the emitter stops it.
pub struct DiscoveryEmitter {
    target: SocketAddr,
    interval: Duration,
    announcement: Vec<u8>,
    worker: Option<Worker>,
}

struct Worker {
    /// Dropping this disconnects the worker's stop channel
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl DiscoveryEmitter {
    /// Build the emitter and encode its announcement frame
    pub fn new(config: &Config) -> Result<Self> {
        let identity = config.identity()?;
        let codec = FrameCodec::new(Cipher::new(&identity.shared_key, identity.version));

        let message = Message::unsolicited(
            CommandType::Query,
            Payload::Discovery(DiscoveryPayload {
                ip: config.ip.to_string(),
                gw_id: identity.id.clone(),
                active: 2,
                ability: 0,
                mode: 0,
                encrypt: true,
                product_key: config.product_key.clone(),
                version: identity.version.as_str().to_string(),
            }),
        );

        Ok(Self {
            target: SocketAddr::from((config.broadcast_addr, config.broadcast_port)),
            interval: Duration::from_secs(config.broadcast_interval_secs),
            announcement: codec.encode(&message)?,
            worker: None,
        })
    }

    /// Override the interval (sub-second intervals are useful in tests)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start broadcasting; does nothing if already running
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            tracing::debug!("Discovery emitter already running");
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;

        let (stop, stopped) = bounded::<()>(1);
        let target = self.target;
        let interval = self.interval;
        let announcement = self.announcement.clone();

        let handle = thread::Builder::new()
            .name("discovery".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                send_announcement(&socket, &announcement, target);

                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => send_announcement(&socket, &announcement, target),
                    }
                }

                tracing::debug!("Discovery emitter stopped");
            })?;

        tracing::info!(
            "Broadcasting discovery to {} every {:?}",
            self.target,
            self.interval
        );

        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stop broadcasting and wait for the worker to exit (socket released)
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.stop);
            let _ = worker.handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Encoded frame that is broadcast on every tick
    pub fn announcement(&self) -> &[u8] {
        &self.announcement
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Drop for DiscoveryEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_announcement(socket: &UdpSocket, announcement: &[u8], target: SocketAddr) {
    match socket.send_to(announcement, target) {
        Ok(_) => tracing::trace!("Sent discovery announcement to {}", target),
        Err(e) => tracing::warn!("Discovery broadcast to {} failed: {}", target, e),
    }
}
