use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ReplicationError, Result};

/// Packet header size: 3 bytes payload length + 1 byte sequence id.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest payload a single frame can carry. A frame of exactly this size is
/// followed by a continuation frame.
pub const MAX_FRAME_PAYLOAD: usize = 0xFF_FFFF;

/// Length-prefixed packet framing over a byte stream.
///
/// Every frame is `[len: u24 LE][seq: u8][payload]`. Sequence ids increase by
/// one per frame in both directions and restart at 0 with every new command.
pub struct PacketTransport<S> {
    stream: S,
    sequence: u8,
}

impl<S> PacketTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
        }
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Next sequence id expected/sent.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketTransport<S> {
    /// Read the next logical packet, reassembling continuation frames.
    pub async fn read(&mut self) -> Result<Bytes> {
        let mut packet = BytesMut::new();
        loop {
            let mut hdr = [0u8; PACKET_HEADER_SIZE];
            self.stream.read_exact(&mut hdr).await?;
            let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], 0]) as usize;
            let seq = hdr[3];
            if seq != self.sequence {
                return Err(ReplicationError::Transport(format!(
                    "packet sequence mismatch: expected {}, got {seq}",
                    self.sequence
                )));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let start = packet.len();
            packet.resize(start + len, 0);
            self.stream.read_exact(&mut packet[start..]).await?;

            if len < MAX_FRAME_PAYLOAD {
                return Ok(packet.freeze());
            }
        }
    }

    /// Frame `payload` with the outgoing sequence and send it.
    pub async fn write(&mut self, payload: &[u8]) -> Result<()> {
        let frames = payload.len() / MAX_FRAME_PAYLOAD + 1;
        let mut buf = BytesMut::with_capacity(payload.len() + frames * PACKET_HEADER_SIZE);

        let mut rest = payload;
        loop {
            let n = rest.len().min(MAX_FRAME_PAYLOAD);
            buf.put_uint_le(n as u64, 3);
            buf.put_u8(self.sequence);
            buf.extend_from_slice(&rest[..n]);
            self.sequence = self.sequence.wrapping_add(1);
            rest = &rest[n..];
            // A full frame must be followed by another one, possibly empty.
            if n < MAX_FRAME_PAYLOAD {
                break;
            }
        }

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a command packet: resets the sequence first.
    pub async fn write_command(&mut self, payload: &[u8]) -> Result<()> {
        self.reset_sequence();
        self.write(payload).await
    }
}
