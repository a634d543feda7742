//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format (all fields big-endian)
//! ```text
//! ┌────────────┬─────────┬─────────┬─────────┬─────────────┬─────────┬────────────┐
//! │ 0x000055AA │ Seq (4) │ Cmd (4) │ Len (4) │   Payload   │ CRC (4) │ 0x0000AA55 │
//! └────────────┴─────────┴─────────┴─────────┴─────────────┴─────────┴────────────┘
//! ```
//!
//! - `Len` counts the payload plus CRC and suffix (payload + 8)
//! - `CRC` is CRC-32 over prefix through the last payload byte
//! - Frames sent by real devices may start the payload with a 4-byte
//!   return code; the decoder skips it

use std::io::{Read, Write};

use bytes::{Buf, BytesMut};

use super::{Cipher, CommandType, Message, Payload};
use crate::error::{Result, StubError};

/// Frame start marker
pub const PREFIX: u32 = 0x0000_55AA;

/// Frame end marker
pub const SUFFIX: u32 = 0x0000_AA55;

/// Header size: prefix (4) + seq (4) + cmd (4) + len (4)
pub const HEADER_SIZE: usize = 16;

/// Trailer size: crc (4) + suffix (4)
pub const TRAILER_SIZE: usize = 8;

/// Default maximum value of the `Len` field (64 KB)
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024;

const PREFIX_BYTES: [u8; 4] = PREFIX.to_be_bytes();

/// CRC-32 as used by the frame trailer
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Frame an already-prepared payload
///
/// Format: prefix + seq + cmd + len + payload + crc + suffix
pub fn encode_frame(sequence: u32, command: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    frame.extend_from_slice(&PREFIX_BYTES);
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&command.to_be_bytes());
    frame.extend_from_slice(&((payload.len() + TRAILER_SIZE) as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    let crc = checksum(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&SUFFIX.to_be_bytes());

    frame
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// =============================================================================
// Message Encoding
// =============================================================================

/// Encodes messages into frames and builds decoders bound to the same key
#[derive(Debug, Clone)]
pub struct FrameCodec {
    cipher: Cipher,
    max_frame_len: u32,
}

impl FrameCodec {
    pub fn new(cipher: Cipher) -> Self {
        Self::with_max_frame_len(cipher, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(cipher: Cipher, max_frame_len: u32) -> Self {
        Self {
            cipher,
            max_frame_len,
        }
    }

    /// Encode a message to bytes
    ///
    /// Steps:
    /// 1. Serialize the payload (empty for heartbeats and acks)
    /// 2. Seal it in the encrypted envelope if the command requires it
    /// 3. Frame it with header, CRC and suffix
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let mut payload = message.payload.to_bytes()?;

        if message.command.is_encrypted() && !payload.is_empty() {
            payload = self.cipher.seal(&payload);
        }

        let len = payload.len() + TRAILER_SIZE;
        if len > self.max_frame_len as usize {
            return Err(StubError::Serialization(format!(
                "frame length {} exceeds maximum {}",
                len, self.max_frame_len
            )));
        }

        Ok(encode_frame(message.sequence, message.command.code(), &payload))
    }

    /// Create a decoder with an empty carry-over buffer
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.clone())
    }

    /// Turn raw frame payload bytes into a typed payload
    pub fn open_payload(&self, command: CommandType, raw: &[u8]) -> Result<Payload> {
        if self.cipher.is_sealed(raw) {
            let plain = self.cipher.open(raw)?;
            return Payload::parse(command, &plain);
        }

        if command.is_encrypted() && !raw.is_empty() {
            return Err(StubError::MalformedFrame(format!(
                "{} payload is not encrypted",
                command
            )));
        }

        Payload::parse(command, raw)
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }
}

// =============================================================================
// Stream Decoding
// =============================================================================

/// Incremental frame decoder
///
/// Accumulates bytes across reads so that a frame split over several
/// deliveries is decoded exactly once, and several frames in one delivery
/// are all decoded in order.
pub struct FrameDecoder {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Push newly received bytes and decode every complete frame
    ///
    /// Each entry is one frame: a message, or the error that caused that
    /// frame alone to be discarded. Incomplete trailing bytes stay buffered.
    pub fn decode(&mut self, data: &[u8]) -> Vec<Result<Message>> {
        self.buffer.extend_from_slice(data);

        let mut decoded = Vec::new();
        while let Some(result) = self.next_frame() {
            decoded.push(result);
        }
        decoded
    }

    /// Bytes retained for the next call
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extract the next frame, or `None` if more bytes are needed
    fn next_frame(&mut self) -> Option<Result<Message>> {
        // Step 1: Discard noise before the prefix
        match find_prefix(&self.buffer) {
            Some(0) => {}
            Some(pos) => {
                tracing::debug!("Discarding {} bytes before frame prefix", pos);
                self.buffer.advance(pos);
            }
            None => {
                // Keep a possible partial prefix at the tail
                let keep = PREFIX_BYTES.len() - 1;
                if self.buffer.len() > keep {
                    let discard = self.buffer.len() - keep;
                    tracing::debug!("Discarding {} bytes without frame prefix", discard);
                    self.buffer.advance(discard);
                }
                return None;
            }
        }

        // Step 2: Wait for a full header
        if self.buffer.len() < HEADER_SIZE {
            return None;
        }

        let sequence = read_u32(&self.buffer, 4);
        let command = CommandType::from_code(read_u32(&self.buffer, 8));
        let len = read_u32(&self.buffer, 12);

        // Step 3: Validate the declared length before buffering for it
        if len < TRAILER_SIZE as u32 || len > self.codec.max_frame_len {
            // Skip this prefix so the next call resynchronises
            self.buffer.advance(PREFIX_BYTES.len());
            return Some(Err(StubError::MalformedFrame(format!(
                "declared length {} outside {}..={}",
                len, TRAILER_SIZE, self.codec.max_frame_len
            ))));
        }

        // Step 4: Wait for the whole frame
        let total = HEADER_SIZE + len as usize;
        if self.buffer.len() < total {
            return None;
        }

        let frame = self.buffer.split_to(total);
        Some(self.parse_frame(&frame, sequence, command))
    }

    /// Validate trailer and checksum, then open the payload
    fn parse_frame(&self, frame: &[u8], sequence: u32, command: CommandType) -> Result<Message> {
        let total = frame.len();
        let crc_offset = total - TRAILER_SIZE;

        let suffix = read_u32(frame, total - 4);
        if suffix != SUFFIX {
            return Err(StubError::MalformedFrame(format!(
                "bad suffix 0x{:08x}",
                suffix
            )));
        }

        let carried = read_u32(frame, crc_offset);
        let computed = checksum(&frame[..crc_offset]);
        if carried != computed {
            return Err(StubError::Checksum {
                expected: carried,
                actual: computed,
            });
        }

        let mut payload = &frame[HEADER_SIZE..crc_offset];
        if self.has_return_code(payload) {
            payload = &payload[4..];
        }

        let payload = self.codec.open_payload(command, payload)?;

        tracing::trace!("Decoded {} frame, seq={}", command, sequence);

        Ok(Message::new(command, sequence, payload))
    }

    /// Device-originated frames put a small return code before a JSON or
    /// sealed body; raw bodies are never stripped
    fn has_return_code(&self, payload: &[u8]) -> bool {
        if payload.len() < 4 || read_u32(payload, 0) & 0xFFFF_FF00 != 0 {
            return false;
        }

        let body = &payload[4..];
        body.first() == Some(&b'{') || self.codec.cipher.is_sealed(body)
    }
}

fn find_prefix(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(PREFIX_BYTES.len())
        .position(|window| window == PREFIX_BYTES)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Write a message to a stream
pub fn write_message<W: Write>(writer: &mut W, codec: &FrameCodec, message: &Message) -> Result<()> {
    let bytes = codec.encode(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read from a stream until at least one frame is decoded
///
/// Blocks until a frame completes or the stream errors; end of stream is
/// reported as `UnexpectedEof`.
pub fn read_messages<R: Read>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Vec<Result<Message>>> {
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(StubError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed before a complete frame",
            )));
        }

        let decoded = decoder.decode(&buf[..n]);
        if !decoded.is_empty() {
            return Ok(decoded);
        }
    }
}
