//! Length-prefixed BGP frame reader ("chopper"), grounded on
//! `beka/chopper.py`: pull the 19-byte header, verify the marker, read
//! exactly `length - 19` more bytes.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BgpError, BgpResult};
use crate::message::{MessageType, HEADER_LENGTH, MARKER};

/// One (type, body) pair read off the wire, with the header already
/// stripped and verified.
pub struct Frame {
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

/// Reads BGP frames off an `AsyncRead` stream, one at a time.
///
/// Mirrors `Chopper.next`: a short read anywhere in the header or body is
/// `SocketClosed`; a bad marker or a length field under the header size is
/// `ProtocolViolation`.
pub struct Framer<R> {
    input: R,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Read the next frame, or `None` if the stream reached a clean EOF
    /// exactly on a frame boundary (no bytes of the next header read).
    pub async fn next_frame(&mut self) -> BgpResult<Frame> {
        let mut header = [0u8; HEADER_LENGTH];
        self.input
            .read_exact(&mut header)
            .await
            .map_err(|e| BgpError::socket_closed(format!("reading frame header: {e}")))?;

        if header[..16] != MARKER {
            return Err(BgpError::protocol("BGP marker missing"));
        }
        let length = u16::from_be_bytes([header[16], header[17]]) as usize;
        if length < HEADER_LENGTH {
            return Err(BgpError::protocol(format!(
                "invalid BGP length field {length}"
            )));
        }
        let message_type = MessageType::from_code(header[18])?;

        let body_length = length - HEADER_LENGTH;
        let mut body = vec![0u8; body_length];
        if body_length > 0 {
            self.input
                .read_exact(&mut body)
                .await
                .map_err(|e| BgpError::socket_closed(format!("reading frame body: {e}")))?;
        }

        Ok(Frame { message_type, body })
    }
}
