//! Frame encoding and decoding
//!
//! A frame is a 4-byte unsigned length in native byte order followed by
//! exactly that many bytes of serialized envelope.

use std::io::{self, Read, Write};

use crate::error::{RpcError, RpcResult};

/// Default upper bound on a frame's payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec enforcing a maximum payload size
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Maximum payload size in bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the maximum frame size
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Check if a payload size is valid
    pub fn is_valid_size(&self, size: usize) -> bool {
        size > 0 && size <= self.max_frame_size
    }

    /// Write one frame.
    ///
    /// Header and payload go out in a single `write_all` so that callers
    /// holding the connection's send lock never emit half a frame.
    pub fn write_frame<W: Write + ?Sized>(&self, writer: &mut W, payload: &[u8]) -> RpcResult<()> {
        if !self.is_valid_size(payload.len()) {
            return Err(RpcError::protocol(format!(
                "Frame size {} outside 1..={}",
                payload.len(),
                self.max_frame_size
            )));
        }
        let header = FrameHeader::for_payload(payload.len())?;

        let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one frame, blocking until it is complete.
    pub fn read_frame<R: Read + ?Sized>(&self, reader: &mut R) -> RpcResult<Vec<u8>> {
        let mut header = [0u8; FrameHeader::SIZE];
        read_full(reader, &mut header)?;
        let header = FrameHeader::decode(header);

        let len = header.payload_len as usize;
        if !self.is_valid_size(len) {
            return Err(RpcError::protocol(format!(
                "Frame size {} outside 1..={}",
                len, self.max_frame_size
            )));
        }

        let mut payload = vec![0u8; len];
        read_full(reader, &mut payload)?;
        Ok(payload)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub payload_len: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 4;

    /// Build the header for a payload of `len` bytes.
    pub fn for_payload(len: usize) -> RpcResult<Self> {
        let payload_len = u32::try_from(len)
            .map_err(|e| RpcError::protocol(format!("Frame size {len}: {e}")))?;
        Ok(Self { payload_len })
    }

    /// Encode the header to bytes
    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.payload_len.to_ne_bytes()
    }

    /// Decode a header from bytes
    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            payload_len: u32::from_ne_bytes(bytes),
        }
    }
}

/// Fill `buf` completely, looping over short reads.
///
/// A short read only means more data is pending; end of stream before the
/// buffer is full is a connection error.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> RpcResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let rest = buf.get_mut(filled..).unwrap_or_default();
        match reader.read(rest) {
            Ok(0) => {
                return Err(RpcError::connection(if filled == 0 {
                    "peer closed the connection".to_string()
                } else {
                    format!("peer closed the connection mid-frame ({filled}/{} bytes)", buf.len())
                }));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
