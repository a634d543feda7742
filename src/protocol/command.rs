//! Command definitions
//!
//! Command codes carried in the frame header.

use std::fmt;

/// Command types the emulator understands
///
/// Codes outside the handled set are preserved as `Unknown` so that the
/// codec can still frame them and the engine can log them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Set data points (request) or host-triggered state push
    Control,

    /// Unsolicited status report
    Status,

    /// Keep-alive ping/pong
    Heartbeat,

    /// Read all data points; also used for discovery announcements
    Query,

    /// Anything else
    Unknown(u32),
}

impl CommandType {
    pub const CONTROL: u32 = 0x07;
    pub const STATUS: u32 = 0x08;
    pub const HEART_BEAT: u32 = 0x09;
    pub const DP_QUERY: u32 = 0x0a;

    /// Map a wire code to a command type
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::CONTROL => CommandType::Control,
            Self::STATUS => CommandType::Status,
            Self::HEART_BEAT => CommandType::Heartbeat,
            Self::DP_QUERY => CommandType::Query,
            other => CommandType::Unknown(other),
        }
    }

    /// Wire code for this command type
    pub fn code(&self) -> u32 {
        match self {
            CommandType::Control => Self::CONTROL,
            CommandType::Status => Self::STATUS,
            CommandType::Heartbeat => Self::HEART_BEAT,
            CommandType::Query => Self::DP_QUERY,
            CommandType::Unknown(code) => *code,
        }
    }

    /// Whether a non-empty payload of this type travels inside the encrypted envelope
    pub fn is_encrypted(&self) -> bool {
        matches!(self, CommandType::Control | CommandType::Status)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Control => f.write_str("CONTROL"),
            CommandType::Status => f.write_str("STATUS"),
            CommandType::Heartbeat => f.write_str("HEART_BEAT"),
            CommandType::Query => f.write_str("DP_QUERY"),
            CommandType::Unknown(code) => write!(f, "UNKNOWN(0x{:02x})", code),
        }
    }
}
