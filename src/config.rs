//! Configuration for tuya-stub
//!
//! Centralized configuration with sensible defaults.

use std::net::Ipv4Addr;

use crate::error::{Result, StubError};
use crate::state::{DpKey, DpValue, Dps};

/// Length in bytes of the shared device key (AES-128)
pub const SHARED_KEY_LEN: usize = 16;

/// Main configuration for an emulated device
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Device Identity
    // -------------------------------------------------------------------------
    /// Device identifier (`devId` / `gwId` on the wire)
    pub device_id: String,

    /// Local key shared with clients, used verbatim as the AES-128 key
    pub shared_key: String,

    /// Protocol version spoken by the device
    pub protocol_version: ProtocolVersion,

    /// Product key advertised in discovery broadcasts
    pub product_key: String,

    // -------------------------------------------------------------------------
    // Device State
    // -------------------------------------------------------------------------
    /// Data points the device starts with
    pub initial_state: Dps,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Address advertised in discovery broadcasts
    pub ip: Ipv4Addr,

    /// Interface the stream listener binds to
    pub bind_host: Ipv4Addr,

    /// TCP port for the control connection (0 picks an ephemeral port)
    pub listen_port: u16,

    /// What to do when a second client connects
    pub connection_policy: ConnectionPolicy,

    /// Close a connection that sends nothing for this long (milliseconds, 0 disables)
    pub idle_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,

    /// Largest `Len` header value accepted before a frame is rejected
    pub max_frame_len: u32,

    // -------------------------------------------------------------------------
    // Discovery Configuration
    // -------------------------------------------------------------------------
    /// Whether the discovery emitter runs alongside the listener
    pub discovery_enabled: bool,

    /// Destination address for discovery datagrams
    pub broadcast_addr: Ipv4Addr,

    /// Destination UDP port for discovery datagrams
    pub broadcast_port: u16,

    /// Seconds between discovery datagrams
    pub broadcast_interval_secs: u64,
}

/// Protocol versions the emulator can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// 3.1: plaintext queries, AES-ECB + base64 envelope for control/status
    V3_1,
}

impl ProtocolVersion {
    /// Version tag as it appears in payload envelopes and discovery
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "3.1",
        }
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = StubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "3.1" => Ok(ProtocolVersion::V3_1),
            other => Err(StubError::Config(format!(
                "unsupported protocol version {:?}",
                other
            ))),
        }
    }
}

/// Connection ownership policy for the single control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Refuse new connections while one is active
    RejectIfBusy,

    /// Close the active connection and hand the channel to the newcomer
    ReplacePrevious,
}

/// Immutable identity of the emulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub shared_key: [u8; SHARED_KEY_LEN],
    pub version: ProtocolVersion,
}

impl DeviceIdentity {
    /// Build an identity, checking the key length
    pub fn new(id: impl Into<String>, shared_key: &str, version: ProtocolVersion) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(StubError::Config("device id must not be empty".to_string()));
        }

        let key: [u8; SHARED_KEY_LEN] = shared_key.as_bytes().try_into().map_err(|_| {
            StubError::Config(format!(
                "shared key must be exactly {} bytes, got {}",
                SHARED_KEY_LEN,
                shared_key.len()
            ))
        })?;

        Ok(Self {
            id,
            shared_key: key,
            version,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            shared_key: String::new(),
            protocol_version: ProtocolVersion::V3_1,
            product_key: String::new(),
            initial_state: Dps::new(),
            ip: Ipv4Addr::LOCALHOST,
            bind_host: Ipv4Addr::UNSPECIFIED,
            listen_port: 6668,
            connection_policy: ConnectionPolicy::ReplacePrevious,
            idle_timeout_ms: 30_000,
            write_timeout_ms: 5000,
            max_frame_len: 64 * 1024,
            discovery_enabled: true,
            broadcast_addr: Ipv4Addr::BROADCAST,
            broadcast_port: 6666,
            broadcast_interval_secs: 5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Derive the device identity from this config
    pub fn identity(&self) -> Result<DeviceIdentity> {
        DeviceIdentity::new(&self.device_id, &self.shared_key, self.protocol_version)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the device id
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.config.device_id = id.into();
        self
    }

    /// Set the shared key (16 bytes)
    pub fn shared_key(mut self, key: impl Into<String>) -> Self {
        self.config.shared_key = key.into();
        self
    }

    /// Set the protocol version
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Set the product key advertised in discovery
    pub fn product_key(mut self, key: impl Into<String>) -> Self {
        self.config.product_key = key.into();
        self
    }

    /// Replace the initial state
    pub fn initial_state(mut self, dps: Dps) -> Self {
        self.config.initial_state = dps;
        self
    }

    /// Add one data point to the initial state
    pub fn dp(mut self, key: impl Into<DpKey>, value: impl Into<DpValue>) -> Self {
        self.config.initial_state.insert(key.into(), value.into());
        self
    }

    /// Set the advertised address
    pub fn ip(mut self, ip: Ipv4Addr) -> Self {
        self.config.ip = ip;
        self
    }

    /// Set the interface the listener binds to
    pub fn bind_host(mut self, host: Ipv4Addr) -> Self {
        self.config.bind_host = host;
        self
    }

    /// Set the TCP listen port
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    /// Set the connection ownership policy
    pub fn connection_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.config.connection_policy = policy;
        self
    }

    /// Set the idle timeout (in milliseconds)
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the largest accepted frame length
    pub fn max_frame_len(mut self, len: u32) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Enable or disable the discovery emitter
    pub fn discovery_enabled(mut self, enabled: bool) -> Self {
        self.config.discovery_enabled = enabled;
        self
    }

    /// Set the discovery destination address
    pub fn broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.config.broadcast_addr = addr;
        self
    }

    /// Set the discovery destination port
    pub fn broadcast_port(mut self, port: u16) -> Self {
        self.config.broadcast_port = port;
        self
    }

    /// Set the discovery interval (in seconds)
    pub fn broadcast_interval_secs(mut self, secs: u64) -> Self {
        self.config.broadcast_interval_secs = secs;
        self
    }

    /// Validate and produce the config
    pub fn build(self) -> Result<Config> {
        // Surfaces id/key problems at construction time
        self.config.identity()?;

        if self.config.broadcast_interval_secs == 0 {
            return Err(StubError::Config(
                "broadcast interval must be at least one second".to_string(),
            ));
        }

        Ok(self.config)
    }
}
