//! Binlog event decoding.
//!
//! - [`event`]: the event header and the [`BinlogEvent`] sum type
//! - [`value`]: column types and row value decoding
//! - [`decoder`]: [`decode_event`] plus the [`DecoderState`] it threads through a stream
//!
//! # Event Layout
//!
//! Each dump-stream packet is a `0x00` status byte, a 19-byte header
//! (timestamp, type, server id, event size, next position, flags), the
//! type-specific post-header and body, and (when checksums are negotiated) a
//! CRC32 trailer over everything from the header on.

pub mod decoder;
pub mod event;
pub mod value;

pub use decoder::{DecoderState, decode_event};
pub use event::{
    BinlogEvent, ChecksumAlgorithm, EventBody, EventHeader, EventType, QueryEvent, RotateEvent,
    RowChange, RowImage, RowsEvent, RowsKind, TableMapEvent,
};
pub use value::{ColumnType, ColumnValue};
