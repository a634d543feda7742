//! Engine Module
//!
//! The protocol session state machine of the emulated device.
//!
//! ## Responsibilities
//! - Validate decoded requests against the device identity
//! - Answer DP_QUERY, CONTROL and HEART_BEAT with correctly sequenced replies
//! - Own the device state and serialize every mutation
//! - Track which connection owns the control channel and push
//!   unsolicited state updates to it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, ConnectionPolicy, DeviceIdentity};
use crate::error::{Result, StubError};
use crate::protocol::{
    Cipher, CommandType, ControlPayload, FrameCodec, Message, Payload, QueryPayload,
    StatusPayload,
};
use crate::state::{DeviceStore, DpKey, DpValue, Dps};

/// Largest accepted distance between a request's `t` and the device clock
pub const STALE_WINDOW_SECS: i64 = 10;

/// Write side of the connection that currently owns the control channel
pub trait Outbound: Send + Sync {
    /// Write one encoded frame
    fn send(&self, frame: &[u8]) -> std::io::Result<()>;

    /// Tear the connection down (unblocks its reader)
    fn close(&self);

    /// Peer address for logging
    fn peer(&self) -> String;
}

/// Token identifying one attached connection
pub type AttachmentId = u64;

/// Lifecycle of the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No client connected
    Idle,

    /// A client owns the control channel
    Connected { peer: String },

    /// The engine has been shut down; attaching fails
    Closed,
}

struct Attachment {
    id: AttachmentId,
    outbound: Arc<dyn Outbound>,
}

#[derive(Default)]
struct Session {
    closed: bool,
    active: Option<Attachment>,
}

/// The emulated device
///
/// ## Concurrency Model
///
/// - **State** (`store`): one write lock per mutation, so a control batch
///   and a host `set_property` never interleave
/// - **Session** (`session`): guards connection ownership; host pushes
///   and `respond` hold it while writing so frames leave in the order the
///   state changed
/// - Lock order is always session → store
pub struct Engine {
    identity: DeviceIdentity,
    codec: FrameCodec,
    store: DeviceStore,
    policy: ConnectionPolicy,
    session: Mutex<Session>,
    next_attachment: AtomicU64,
}

impl Engine {
    /// Create an engine from a validated config
    pub fn new(config: &Config) -> Result<Self> {
        let identity = config.identity()?;
        let cipher = Cipher::new(&identity.shared_key, identity.version);

        Ok(Self {
            identity,
            codec: FrameCodec::with_max_frame_len(cipher, config.max_frame_len),
            store: DeviceStore::new(config.initial_state.clone()),
            policy: config.connection_policy,
            session: Mutex::new(Session::default()),
            next_attachment: AtomicU64::new(1),
        })
    }

    // =========================================================================
    // Wire Handling
    // =========================================================================

    /// Handle one decoded request, returning the frames to send back in order
    pub fn handle(&self, message: &Message) -> Result<Vec<Message>> {
        self.handle_at(message, chrono::Utc::now().timestamp())
    }

    /// Handle one decoded request and pass its responses to `deliver`
    ///
    /// `deliver` runs under the session lock; host pushes cannot interleave
    /// with the responses it writes.
    pub fn respond<F, T>(&self, message: &Message, deliver: F) -> Result<T>
    where
        F: FnOnce(Vec<Message>) -> T,
    {
        let _session = self.session.lock();
        let responses = self.handle(message)?;
        Ok(deliver(responses))
    }

    /// Handle one decoded request against the given device clock (unix seconds)
    pub fn handle_at(&self, message: &Message, now: i64) -> Result<Vec<Message>> {
        match message.command {
            CommandType::Query => self.handle_query(message),
            CommandType::Control => self.handle_control(message, now),
            CommandType::Heartbeat => {
                tracing::trace!("Heartbeat seq={}", message.sequence);
                Ok(vec![Message::new(
                    CommandType::Heartbeat,
                    message.sequence,
                    Payload::Empty,
                )])
            }
            other => {
                tracing::debug!("Unhandled command {} seq={}", other, message.sequence);
                Ok(Vec::new())
            }
        }
    }

    fn handle_query(&self, message: &Message) -> Result<Vec<Message>> {
        let request = match &message.payload {
            Payload::Query(request) => request,
            other => return Err(unexpected_body(message.command, other)),
        };

        self.verify_identity(&request.dev_id)?;

        let report = QueryPayload::report(&self.identity.id, self.store.snapshot());
        Ok(vec![Message::new(
            CommandType::Query,
            message.sequence,
            Payload::Query(report),
        )])
    }

    /// Steps:
    /// 1. Verify device id and timestamp window
    /// 2. Apply every data point under one write lock
    /// 3. Ack with the request's sequence, then push the resulting state
    fn handle_control(&self, message: &Message, now: i64) -> Result<Vec<Message>> {
        let request = match &message.payload {
            Payload::Control(request) => request,
            other => return Err(unexpected_body(message.command, other)),
        };

        self.verify_identity(&request.dev_id)?;

        if request.t.abs_diff(now) > STALE_WINDOW_SECS.unsigned_abs() {
            return Err(StubError::StaleRequest {
                timestamp: request.t,
                now,
                window: STALE_WINDOW_SECS,
            });
        }

        let state = self.store.apply(&request.dps);
        tracing::debug!("Applied {} data points from CONTROL", request.dps.len());

        let ack = Message::new(CommandType::Control, message.sequence, Payload::Empty);
        let push = Message::unsolicited(
            CommandType::Status,
            Payload::Status(StatusPayload {
                dev_id: self.identity.id.clone(),
                dps: state,
                t: Some(now),
            }),
        );

        Ok(vec![ack, push])
    }

    fn verify_identity(&self, dev_id: &str) -> Result<()> {
        if dev_id != self.identity.id {
            return Err(StubError::IdentityMismatch {
                expected: self.identity.id.clone(),
                actual: dev_id.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Host Mutation API
    // =========================================================================

    /// Get a single data point
    pub fn get_property(&self, key: impl Into<DpKey>) -> Option<DpValue> {
        self.store.get(&key.into())
    }

    /// Set a single data point and push the full state to the connected client
    pub fn set_property(&self, key: impl Into<DpKey>, value: impl Into<DpValue>) {
        let session = self.session.lock();
        let state = self.store.set(key.into(), value.into());
        self.push_state(&session, state);
    }

    /// Copy of the whole state
    pub fn get_state(&self) -> Dps {
        self.store.snapshot()
    }

    /// Replace the whole state and push it to the connected client
    pub fn set_state(&self, state: Dps) {
        let session = self.session.lock();
        self.store.replace(state.clone());
        self.push_state(&session, state);
    }

    /// Send a CONTROL push (no sequence) if a client is attached
    ///
    /// The state change has already happened; a failed write is logged and
    /// the connection's own reader will notice the broken socket.
    fn push_state(&self, session: &Session, state: Dps) {
        let Some(active) = &session.active else {
            return;
        };

        let push = Message::unsolicited(
            CommandType::Control,
            Payload::Control(ControlPayload::new(
                &self.identity.id,
                chrono::Utc::now().timestamp(),
                state,
            )),
        );

        match self.codec.encode(&push) {
            Ok(bytes) => {
                if let Err(e) = active.outbound.send(&bytes) {
                    tracing::warn!("Failed to push state to {}: {}", active.outbound.peer(), e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode state push: {}", e),
        }
    }

    // =========================================================================
    // Connection Ownership
    // =========================================================================

    /// Give `outbound` ownership of the control channel according to the policy
    pub fn attach(&self, outbound: Arc<dyn Outbound>) -> Result<AttachmentId> {
        let mut session = self.session.lock();

        if session.closed {
            return Err(StubError::Closed);
        }

        if let Some(previous) = &session.active {
            match self.policy {
                ConnectionPolicy::RejectIfBusy => {
                    return Err(StubError::Busy(format!(
                        "{} already owns the connection",
                        previous.outbound.peer()
                    )));
                }
                ConnectionPolicy::ReplacePrevious => {
                    tracing::info!(
                        "Replacing connection {} with {}",
                        previous.outbound.peer(),
                        outbound.peer()
                    );
                    previous.outbound.close();
                }
            }
        }

        let id = self.next_attachment.fetch_add(1, Ordering::Relaxed);
        session.active = Some(Attachment { id, outbound });
        Ok(id)
    }

    /// Release the control channel if `id` still owns it
    pub fn detach(&self, id: AttachmentId) {
        let mut session = self.session.lock();
        if session.active.as_ref().map(|a| a.id) == Some(id) {
            session.active = None;
        }
    }

    /// Current lifecycle state
    pub fn session_state(&self) -> SessionState {
        let session = self.session.lock();
        if session.closed {
            SessionState::Closed
        } else if let Some(active) = &session.active {
            SessionState::Connected {
                peer: active.outbound.peer(),
            }
        } else {
            SessionState::Idle
        }
    }

    /// Whether a client currently owns the control channel
    pub fn is_connected(&self) -> bool {
        self.session.lock().active.is_some()
    }

    /// Close the active connection and refuse new ones
    pub fn close(&self) {
        let mut session = self.session.lock();
        session.closed = true;
        if let Some(active) = session.active.take() {
            active.outbound.close();
        }
    }

    /// Accept connections again after `close`
    pub fn reopen(&self) {
        self.session.lock().closed = false;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Codec bound to this device's key
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

fn unexpected_body(command: CommandType, payload: &Payload) -> StubError {
    let kind = match payload {
        Payload::Empty => "empty",
        Payload::Query(_) => "query",
        Payload::Control(_) => "control",
        Payload::Status(_) => "status",
        Payload::Discovery(_) => "discovery",
        Payload::Raw(_) => "raw",
    };
    StubError::MalformedFrame(format!("{} request with {} body", command, kind))
}
