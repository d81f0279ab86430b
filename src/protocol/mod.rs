//! MySQL client/server wire protocol.
//!
//! This module provides low-level primitives for:
//! - Reading and writing length-prefixed packets ([`framing`])
//! - Bounds-checked payload decoding ([`buf`])
//! - Parsing OK/ERR/EOF responses ([`messages`])
//! - Connection-phase authentication ([`handshake`])
//! - Encoding replication commands ([`command`])
//! - Reading text result sets ([`resultset`])
//!
//! # Wire Protocol Overview
//!
//! Every packet consists of:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence id
//! - N bytes: payload
//!
//! Payloads of 16 MiB - 1 bytes or more are split across several frames.
//!
//! # Replication Protocol
//!
//! After `COM_REGISTER_SLAVE` and `COM_BINLOG_DUMP`, the server streams binlog
//! events, each in its own packet prefixed by a `0x00` status byte. See
//! [`crate::binlog`] for event decoding.

pub mod buf;
pub mod command;
pub mod framing;
pub mod handshake;
pub mod messages;
pub mod resultset;

pub use buf::WireReader;
pub use framing::{MAX_FRAME_PAYLOAD, PacketTransport};
pub use handshake::{Greeting, HandshakeAuthenticator, HandshakeState};
pub use messages::{ErrPacket, OkPacket, expect_ok, parse_err_packet, parse_ok_packet};
pub use resultset::{ResultSet, read_text_result_set};
