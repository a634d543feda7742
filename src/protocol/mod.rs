//! Protocol Module
//!
//! Defines the Tuya LAN wire protocol (version 3.1) spoken with clients.
//!
//! ## Frame Format
//! ```text
//! ┌────────────┬─────────┬─────────┬─────────┬─────────────┬─────────┬────────────┐
//! │ 0x000055AA │ Seq (4) │ Cmd (4) │ Len (4) │   Payload   │ CRC (4) │ 0x0000AA55 │
//! └────────────┴─────────┴─────────┴─────────┴─────────────┴─────────┴────────────┘
//! ```
//!
//! ### Commands
//! - 0x07: CONTROL    - Payload: encrypted `{devId, uid, t, dps}`
//! - 0x08: STATUS     - Payload: encrypted `{devId, dps, t}`
//! - 0x09: HEART_BEAT - Payload: empty
//! - 0x0a: DP_QUERY   - Payload: plaintext `{gwId, devId}` / `{devId, gwId, dps}`
//!
//! ### Encryption
//! CONTROL and STATUS payloads are AES-128-ECB encrypted with the device key,
//! base64 encoded and prefixed with the version tag and an MD5 signature.

mod cipher;
mod codec;
mod command;
mod payload;

pub use cipher::{Cipher, BLOCK_SIZE};
pub use codec::{
    checksum, encode_frame, read_messages, write_message, FrameCodec, FrameDecoder,
    DEFAULT_MAX_FRAME_LEN, HEADER_SIZE, PREFIX, SUFFIX, TRAILER_SIZE,
};
pub use command::CommandType;
pub use payload::{
    ControlPayload, DiscoveryPayload, Message, Payload, QueryPayload, StatusPayload, UNSOLICITED,
};
