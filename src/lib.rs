//! # tuya-stub
//!
//! A local emulator of a Tuya LAN device, so protocol clients can be
//! exercised against a deterministic counterpart instead of hardware:
//! - Bit-exact v3.1 frame codec (CRC-32, AES-128-ECB envelope)
//! - Robust decoding of split and merged TCP reads
//! - Query / control / heartbeat state machine with sequence correlation
//! - Periodic UDP discovery announcements
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │          TCP Server          │      │      Discovery Emitter       │
//! │   (one owning connection)    │      │     (UDP, own ticker)        │
//! └──────────────┬───────────────┘      └──────────────────────────────┘
//!                │ bytes
//! ┌──────────────▼───────────────┐
//! │         Frame Decoder        │
//! │  (carry-over, CRC, decrypt)  │
//! └──────────────┬───────────────┘
//!                │ messages
//! ┌──────────────▼───────────────┐      ┌──────────────────────────────┐
//! │            Engine            │◄─────┤   Host (get/set property)    │
//! │   (session state machine)    │      └──────────────────────────────┘
//! └──────────────┬───────────────┘
//!                │
//!                ▼
//!        ┌──────────────┐
//!        │ DeviceStore  │
//!        │   (RwLock)   │
//!        └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod state;
pub mod protocol;
pub mod engine;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StubError, Result};
pub use config::{Config, ConnectionPolicy, DeviceIdentity, ProtocolVersion};
pub use engine::{Engine, SessionState};
pub use network::Server;
pub use state::{DpKey, DpValue, Dps};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tuya-stub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
