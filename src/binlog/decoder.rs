//! Binlog event decoding.
//!
//! [`decode_event`] turns one packet of the `COM_BINLOG_DUMP` stream into a
//! [`BinlogEvent`]. Everything that outlives a single packet (the server's
//! post-header lengths, checksum setting, and the table maps that give row
//! events their column layout) lives in [`DecoderState`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::binlog::event::{
    BinlogEvent, CHECKSUM_LEN, ChecksumAlgorithm, EVENT_HEADER_LEN, EventBody, EventHeader,
    EventType, FormatDescriptionEvent, GtidEvent, QueryEvent, RotateEvent, RowChange, RowImage,
    RowsEvent, RowsKind, TableMapEvent, UserVarEvent, bit_is_set, bits_set,
};
use crate::binlog::value::{ColumnType, ColumnValue, decode_value};
use crate::error::{ReplicationError, Result};
use crate::protocol::buf::WireReader;
use crate::protocol::handshake::parse_version_triple;
use crate::protocol::messages::{ERR_HEADER, OK_HEADER, parse_err_packet};

const SERVER_VERSION_LEN: usize = 50;

/// Post-header lengths of a v4 binlog written by a 5.x server, used until a
/// FormatDescription event says otherwise. Indexed by `type_code - 1`.
const DEFAULT_POST_HEADER_LENGTHS: [u8; 35] = [
    56, 13, 0, 8, 0, 18, 0, 4, 4, 4, 4, 18, 0, 0, 84, 0, 4, 26, 8, 8, 8, 8, 8, 8, 8, 2, 0, 0, 0,
    10, 10, 10, 42, 42, 0,
];

/// Decoder state carried across events of one dump stream.
#[derive(Debug, Clone)]
pub struct DecoderState {
    binlog_version: u16,
    server_version: String,
    post_header_lengths: Vec<u8>,
    checksum: ChecksumAlgorithm,
    log_file: String,
    tables: HashMap<u64, Arc<TableMapEvent>>,
    latest_table: Option<u64>,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new(ChecksumAlgorithm::Off)
    }
}

impl DecoderState {
    /// `checksum` is what the connection negotiated with
    /// `SET @master_binlog_checksum`; a FormatDescription event overrides it.
    pub fn new(checksum: ChecksumAlgorithm) -> Self {
        Self {
            binlog_version: 4,
            server_version: String::new(),
            post_header_lengths: DEFAULT_POST_HEADER_LENGTHS.to_vec(),
            checksum,
            log_file: String::new(),
            tables: HashMap::new(),
            latest_table: None,
        }
    }

    pub fn binlog_version(&self) -> u16 {
        self.binlog_version
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn checksum(&self) -> ChecksumAlgorithm {
        self.checksum
    }

    /// Log file the stream is currently in, as announced by Rotate.
    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn set_log_file(&mut self, file: impl Into<String>) {
        self.log_file = file.into();
    }

    pub fn table(&self, table_id: u64) -> Option<&Arc<TableMapEvent>> {
        self.tables.get(&table_id)
    }

    /// Most recently seen table map.
    pub fn latest_table(&self) -> Option<&Arc<TableMapEvent>> {
        self.latest_table.and_then(|id| self.tables.get(&id))
    }

    fn post_header_len(&self, type_code: u8) -> usize {
        let idx = usize::from(type_code).wrapping_sub(1);
        self.post_header_lengths
            .get(idx)
            .or_else(|| DEFAULT_POST_HEADER_LENGTHS.get(idx))
            .copied()
            .unwrap_or(0) as usize
    }
}

fn parse_header(r: &mut WireReader<'_>) -> Result<EventHeader> {
    Ok(EventHeader {
        timestamp: r.u32_le()?,
        type_code: r.u8()?,
        server_id: r.u32_le()?,
        event_size: r.u32_le()?,
        next_position: r.u32_le()?,
        flags: r.u16_le()?,
    })
}

fn verify_checksum(event: &[u8]) -> Result<&[u8]> {
    if event.len() < EVENT_HEADER_LEN + CHECKSUM_LEN {
        return Err(ReplicationError::protocol(
            "event too short to carry a checksum",
        ));
    }
    let (data, trailer) = event.split_at(event.len() - CHECKSUM_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(data);
    if expected != actual {
        return Err(ReplicationError::protocol(format!(
            "event checksum mismatch: expected {expected:08x}, computed {actual:08x}"
        )));
    }
    Ok(data)
}

fn lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn server_version_field(r: &mut WireReader<'_>) -> Result<String> {
    let raw = r.bytes(SERVER_VERSION_LEN)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(lossy(&raw[..end]))
}

/// Decode one dump-stream packet (status byte included).
pub fn decode_event(packet: &[u8], state: &mut DecoderState) -> Result<BinlogEvent> {
    match packet.first().copied() {
        Some(OK_HEADER) => {}
        Some(ERR_HEADER) => {
            let err = parse_err_packet(packet)?;
            return Err(ReplicationError::protocol(format!(
                "error packet in binlog stream: {} (code {})",
                err.message, err.code
            )));
        }
        Some(other) => {
            return Err(ReplicationError::protocol(format!(
                "unexpected binlog packet status byte 0x{other:02x}"
            )));
        }
        None => return Err(ReplicationError::protocol("empty binlog packet")),
    }

    let event = &packet[1..];
    let header = parse_header(&mut WireReader::new(event))?;
    if header.event_size as usize != event.len() {
        return Err(ReplicationError::protocol(format!(
            "event size mismatch: header says {}, packet carries {}",
            header.event_size,
            event.len()
        )));
    }

    let event_type = header.event_type();
    if event_type == EventType::FormatDescription {
        let fde = decode_format_description(event)?;
        apply_format_description(state, &fde);
        return Ok(BinlogEvent {
            header,
            body: EventBody::FormatDescription(fde),
        });
    }

    let data = match state.checksum {
        ChecksumAlgorithm::Crc32 => verify_checksum(event)?,
        ChecksumAlgorithm::Off => event,
    };
    let body = &data[EVENT_HEADER_LEN..];
    let post_header = state.post_header_len(header.type_code);

    if let Some((kind, version)) = event_type.rows_kind() {
        let rows = decode_rows(body, post_header, kind, version, state)?;
        return Ok(BinlogEvent {
            header,
            body: EventBody::Rows(rows),
        });
    }

    let body = match event_type {
        EventType::StartV3 => {
            let mut r = WireReader::new(body);
            EventBody::StartV3 {
                binlog_version: r.u16_le()?,
                server_version: server_version_field(&mut r)?,
                create_timestamp: r.u32_le()?,
            }
        }
        EventType::Rotate => {
            let rotate = decode_rotate(body, post_header)?;
            state.log_file.clone_from(&rotate.next_file);
            EventBody::Rotate(rotate)
        }
        EventType::Query => EventBody::Query(decode_query(body, post_header)?.0),
        EventType::Xid => EventBody::Xid {
            xid: WireReader::new(body).u64_le()?,
        },
        EventType::TableMap => {
            let map = Arc::new(decode_table_map(body, post_header)?);
            state.latest_table = Some(map.table_id);
            state.tables.insert(map.table_id, Arc::clone(&map));
            EventBody::TableMap(map)
        }
        EventType::Heartbeat => EventBody::Heartbeat {
            log_file: lossy(body),
        },
        EventType::Stop => EventBody::Stop,
        EventType::Incident => {
            let mut r = WireReader::new(body);
            let kind = r.u16_le()?;
            let message = if r.is_empty() {
                String::new()
            } else {
                let len = r.u8()? as usize;
                lossy(r.bytes(len)?)
            };
            EventBody::Incident { kind, message }
        }
        EventType::IntVar => {
            let mut r = WireReader::new(body);
            EventBody::IntVar {
                kind: r.u8()?,
                value: r.u64_le()?,
            }
        }
        EventType::Rand => {
            let mut r = WireReader::new(body);
            EventBody::Rand {
                seed1: r.u64_le()?,
                seed2: r.u64_le()?,
            }
        }
        EventType::UserVar => EventBody::UserVar(decode_user_var(body)?),
        EventType::BeginLoadQuery | EventType::AppendBlock => {
            let mut r = WireReader::new(body);
            let file_id = r.u32_le()?;
            let data_len = r.remaining();
            if event_type == EventType::BeginLoadQuery {
                EventBody::BeginLoadQuery { file_id, data_len }
            } else {
                EventBody::AppendBlock { file_id, data_len }
            }
        }
        EventType::ExecuteLoadQuery => {
            let (query, file_id) = decode_query(body, post_header)?;
            EventBody::ExecuteLoadQuery {
                query,
                file_id: file_id.unwrap_or(0),
            }
        }
        EventType::Ignorable => EventBody::Ignorable,
        EventType::RowsQuery => {
            let mut r = WireReader::new(body);
            // One length byte, truncated for long statements; the rest is authoritative.
            r.skip(1)?;
            EventBody::RowsQuery {
                query: lossy(r.rest()),
            }
        }
        EventType::Gtid => EventBody::Gtid(decode_gtid(body)?),
        EventType::AnonymousGtid => EventBody::AnonymousGtid(decode_gtid(body)?),
        EventType::PreviousGtids => EventBody::PreviousGtids {
            data: body.to_vec(),
        },
        _ => {
            tracing::trace!(type_code = header.type_code, "skipping uninterpreted binlog event");
            EventBody::Unknown
        }
    };

    Ok(BinlogEvent { header, body })
}

fn decode_format_description(event: &[u8]) -> Result<FormatDescriptionEvent> {
    let mut r = WireReader::new(&event[EVENT_HEADER_LEN..]);
    let binlog_version = r.u16_le()?;
    let server_version = server_version_field(&mut r)?;
    let create_timestamp = r.u32_le()?;
    let header_length = r.u8()?;
    if header_length as usize != EVENT_HEADER_LEN {
        return Err(ReplicationError::protocol(format!(
            "unsupported event header length {header_length}"
        )));
    }
    let rest = r.rest();

    // Since 5.6.1 the event ends with the checksum algorithm byte and a
    // 4-byte checksum slot, present whether or not checksums are enabled.
    let (post_header_lengths, checksum) = if parse_version_triple(&server_version) >= (5, 6, 1) {
        if rest.len() < 1 + CHECKSUM_LEN {
            return Err(ReplicationError::protocol(
                "format description too short for checksum trailer",
            ));
        }
        let alg_at = rest.len() - 1 - CHECKSUM_LEN;
        let alg = ChecksumAlgorithm::from_u8(rest[alg_at]);
        if alg == Some(ChecksumAlgorithm::Crc32) {
            verify_checksum(event)?;
        }
        (rest[..alg_at].to_vec(), alg)
    } else {
        (rest.to_vec(), None)
    };

    Ok(FormatDescriptionEvent {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        post_header_lengths,
        checksum,
    })
}

fn apply_format_description(state: &mut DecoderState, fde: &FormatDescriptionEvent) {
    state.binlog_version = fde.binlog_version;
    state.server_version.clone_from(&fde.server_version);
    state.post_header_lengths.clone_from(&fde.post_header_lengths);
    if let Some(alg) = fde.checksum {
        state.checksum = alg;
    }
    // Table ids are only meaningful within one log file.
    state.tables.clear();
    state.latest_table = None;
    tracing::debug!(
        binlog_version = fde.binlog_version,
        server_version = %fde.server_version,
        checksum = ?state.checksum,
        "format description"
    );
}

fn decode_rotate(body: &[u8], post_header: usize) -> Result<RotateEvent> {
    let mut r = WireReader::new(body);
    let position = if post_header >= 8 {
        let p = r.u64_le()?;
        r.skip(post_header - 8)?;
        p
    } else {
        4
    };
    Ok(RotateEvent {
        position,
        next_file: lossy(r.rest()),
    })
}

/// Query and ExecuteLoadQuery share a layout; the latter has 13 extra
/// post-header bytes starting with the file id.
fn decode_query(body: &[u8], post_header: usize) -> Result<(QueryEvent, Option<u32>)> {
    let mut r = WireReader::new(body);
    let thread_id = r.u32_le()?;
    let exec_time = r.u32_le()?;
    let schema_len = r.u8()? as usize;
    let error_code = r.u16_le()?;
    let mut consumed = 11;
    let status_vars_len = if post_header >= 13 {
        consumed += 2;
        r.u16_le()? as usize
    } else {
        0
    };
    let file_id = if post_header >= consumed + 4 {
        consumed += 4;
        Some(r.u32_le()?)
    } else {
        None
    };
    r.skip(post_header.saturating_sub(consumed))?;
    r.skip(status_vars_len)?;
    let schema = lossy(r.bytes(schema_len)?);
    r.terminator("schema name")?;
    let statement = lossy(r.rest());
    Ok((
        QueryEvent {
            thread_id,
            exec_time,
            error_code,
            schema,
            statement,
        },
        file_id,
    ))
}

fn read_table_id(r: &mut WireReader<'_>, post_header: usize) -> Result<u64> {
    if post_header == 6 {
        Ok(u64::from(r.u32_le()?))
    } else {
        r.u48_le()
    }
}

fn decode_table_map(body: &[u8], post_header: usize) -> Result<TableMapEvent> {
    let mut r = WireReader::new(body);
    let table_id = read_table_id(&mut r, post_header)?;
    let flags = r.u16_le()?;
    let id_width = if post_header == 6 { 4 } else { 6 };
    r.skip(post_header.saturating_sub(id_width + 2))?;

    let schema_len = r.u8()? as usize;
    let schema = lossy(r.bytes(schema_len)?);
    r.terminator("schema name")?;
    let table_len = r.u8()? as usize;
    let table = lossy(r.bytes(table_len)?);
    r.terminator("table name")?;

    let column_count = r
        .lenenc_int()?
        .ok_or_else(|| ReplicationError::protocol("NULL column count in table map"))?
        as usize;
    let column_types: Vec<ColumnType> = r
        .bytes(column_count)?
        .iter()
        .map(|&t| ColumnType::from_u8(t))
        .collect();

    let meta_len = r
        .lenenc_int()?
        .ok_or_else(|| ReplicationError::protocol("NULL metadata length in table map"))?
        as usize;
    let mut meta = WireReader::new(r.bytes(meta_len)?);
    let column_metadata = column_types
        .iter()
        .map(|t| t.read_metadata(&mut meta))
        .collect::<Result<Vec<u16>>>()?;
    if !meta.is_empty() {
        return Err(ReplicationError::protocol(format!(
            "table map metadata for {schema}.{table} has {} unread bytes",
            meta.remaining()
        )));
    }

    let null_bitmap = r.bytes(column_count.div_ceil(8))?.to_vec();
    // Optional metadata (MySQL 8 binlog_row_metadata) follows; not needed.

    Ok(TableMapEvent {
        table_id,
        flags,
        schema,
        table,
        column_types,
        column_metadata,
        null_bitmap,
    })
}

fn decode_rows(
    body: &[u8],
    post_header: usize,
    kind: RowsKind,
    version: u8,
    state: &DecoderState,
) -> Result<RowsEvent> {
    let mut r = WireReader::new(body);
    let table_id = read_table_id(&mut r, post_header)?;
    let flags = r.u16_le()?;
    let id_width = if post_header == 6 { 4 } else { 6 };
    let mut consumed = id_width + 2;
    if version == 2 {
        let extra_len = r.u16_le()? as usize;
        consumed += 2;
        if extra_len < 2 {
            return Err(ReplicationError::protocol(format!(
                "invalid rows extra-data length {extra_len}"
            )));
        }
        r.skip(extra_len - 2)?;
    }
    r.skip(post_header.saturating_sub(consumed))?;

    let table = state.tables.get(&table_id).cloned().ok_or_else(|| {
        ReplicationError::protocol(format!("rows event for unknown table id {table_id}"))
    })?;

    let column_count = r
        .lenenc_int()?
        .ok_or_else(|| ReplicationError::protocol("NULL column count in rows event"))?
        as usize;
    if column_count > table.column_count() {
        return Err(ReplicationError::protocol(format!(
            "rows event for {}.{} has {column_count} columns, table map has {}",
            table.schema,
            table.table,
            table.column_count()
        )));
    }
    let bitmap_len = column_count.div_ceil(8);
    let present = r.bytes(bitmap_len)?;
    let present_after = if kind == RowsKind::Update {
        r.bytes(bitmap_len)?
    } else {
        present
    };

    let mut rows = Vec::new();
    while !r.is_empty() {
        let change = match kind {
            RowsKind::Write => RowChange {
                before: None,
                after: Some(read_image(&mut r, &table, column_count, present)?),
            },
            RowsKind::Delete => RowChange {
                before: Some(read_image(&mut r, &table, column_count, present)?),
                after: None,
            },
            RowsKind::Update => {
                let before = read_image(&mut r, &table, column_count, present)?;
                let after = read_image(&mut r, &table, column_count, present_after)?;
                RowChange {
                    before: Some(before),
                    after: Some(after),
                }
            }
        };
        rows.push(change);
    }

    Ok(RowsEvent {
        kind,
        version,
        table_id,
        flags,
        table,
        rows,
    })
}

/// One row image: a null bitmap over the present columns, then the values of
/// the present non-NULL columns in column order.
fn read_image(
    r: &mut WireReader<'_>,
    table: &TableMapEvent,
    column_count: usize,
    present: &[u8],
) -> Result<RowImage> {
    let present_count = bits_set(present, column_count);
    let nulls = r.bytes(present_count.div_ceil(8))?;

    let mut image: RowImage = vec![None; column_count];
    let mut nth_present = 0;
    for (col, slot) in image.iter_mut().enumerate() {
        if !bit_is_set(present, col) {
            continue;
        }
        let value = if bit_is_set(nulls, nth_present) {
            ColumnValue::Null
        } else {
            decode_value(r, table.column_types[col], table.column_metadata[col])?
        };
        *slot = Some(value);
        nth_present += 1;
    }
    Ok(image)
}

fn decode_user_var(body: &[u8]) -> Result<UserVarEvent> {
    let mut r = WireReader::new(body);
    let name_len = r.u32_le()? as usize;
    let name = lossy(r.bytes(name_len)?);
    let is_null = r.u8()? != 0;
    let value = if is_null {
        None
    } else {
        let _value_type = r.u8()?;
        let _charset = r.u32_le()?;
        let len = r.u32_le()? as usize;
        Some(r.bytes(len)?.to_vec())
    };
    Ok(UserVarEvent { name, value })
}

fn decode_gtid(body: &[u8]) -> Result<GtidEvent> {
    let mut r = WireReader::new(body);
    let commit_flag = r.u8()? != 0;
    let mut sid = [0u8; 16];
    sid.copy_from_slice(r.bytes(16)?);
    let gno = r.u64_le()?;
    Ok(GtidEvent {
        commit_flag,
        sid,
        gno,
    })
}
