//! Binlog event types.

use std::sync::Arc;

use crate::binlog::value::{ColumnType, ColumnValue};

/// Common event header length for binlog format v4.
pub const EVENT_HEADER_LEN: usize = 19;
/// CRC32 trailer length when checksums are enabled.
pub const CHECKSUM_LEN: usize = 4;

/// Binlog event type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    StartV3,
    Query,
    Stop,
    Rotate,
    IntVar,
    Load,
    Slave,
    CreateFile,
    AppendBlock,
    ExecLoad,
    DeleteFile,
    NewLoad,
    Rand,
    UserVar,
    FormatDescription,
    Xid,
    BeginLoadQuery,
    ExecuteLoadQuery,
    TableMap,
    WriteRowsV0,
    UpdateRowsV0,
    DeleteRowsV0,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Incident,
    Heartbeat,
    Ignorable,
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    Unknown(u8),
}

impl EventType {
    pub fn from_u8(code: u8) -> Self {
        match code {
            1 => EventType::StartV3,
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            5 => EventType::IntVar,
            6 => EventType::Load,
            7 => EventType::Slave,
            8 => EventType::CreateFile,
            9 => EventType::AppendBlock,
            10 => EventType::ExecLoad,
            11 => EventType::DeleteFile,
            12 => EventType::NewLoad,
            13 => EventType::Rand,
            14 => EventType::UserVar,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            17 => EventType::BeginLoadQuery,
            18 => EventType::ExecuteLoadQuery,
            19 => EventType::TableMap,
            20 => EventType::WriteRowsV0,
            21 => EventType::UpdateRowsV0,
            22 => EventType::DeleteRowsV0,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            26 => EventType::Incident,
            27 => EventType::Heartbeat,
            28 => EventType::Ignorable,
            29 => EventType::RowsQuery,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => EventType::Unknown(other),
        }
    }

    /// `(kind, version)` for row events.
    pub fn rows_kind(self) -> Option<(RowsKind, u8)> {
        match self {
            EventType::WriteRowsV0 => Some((RowsKind::Write, 0)),
            EventType::UpdateRowsV0 => Some((RowsKind::Update, 0)),
            EventType::DeleteRowsV0 => Some((RowsKind::Delete, 0)),
            EventType::WriteRowsV1 => Some((RowsKind::Write, 1)),
            EventType::UpdateRowsV1 => Some((RowsKind::Update, 1)),
            EventType::DeleteRowsV1 => Some((RowsKind::Delete, 1)),
            EventType::WriteRowsV2 => Some((RowsKind::Write, 2)),
            EventType::UpdateRowsV2 => Some((RowsKind::Update, 2)),
            EventType::DeleteRowsV2 => Some((RowsKind::Delete, 2)),
            _ => None,
        }
    }
}

/// The 19-byte v4 event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub type_code: u8,
    pub server_id: u32,
    pub event_size: u32,
    /// Offset of the next event in the current log file. 0 for artificial
    /// events (the fake Rotate at stream start, heartbeats).
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn event_type(&self) -> EventType {
        EventType::from_u8(self.type_code)
    }

    /// Offset at which this event starts.
    pub fn position(&self) -> u64 {
        u64::from(self.next_position).saturating_sub(u64::from(self.event_size))
    }

    /// Artificial events are generated by the dump thread, not read from the log.
    pub fn is_artificial(&self) -> bool {
        self.flags & LOG_EVENT_ARTIFICIAL_F != 0 || self.next_position == 0
    }
}

pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Off,
    Crc32,
}

impl ChecksumAlgorithm {
    /// Algorithm byte of a FormatDescription event. 255 means "undefined"
    /// (written by servers that predate checksums).
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChecksumAlgorithm::Off),
            1 => Some(ChecksumAlgorithm::Crc32),
            _ => None,
        }
    }

    /// Value of `@@global.binlog_checksum`.
    pub fn from_variable(value: &str) -> Self {
        if value.eq_ignore_ascii_case("CRC32") {
            ChecksumAlgorithm::Crc32
        } else {
            ChecksumAlgorithm::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    /// Post-header length per event type, indexed by `type_code - 1`.
    pub post_header_lengths: Vec<u8>,
    /// `None` for servers older than 5.6.1.
    pub checksum: Option<ChecksumAlgorithm>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    pub schema: String,
    pub statement: String,
}

impl QueryEvent {
    pub fn is_begin(&self) -> bool {
        let statement = self.statement.trim();
        let statement = statement.strip_suffix(';').unwrap_or(statement).trim_end();
        statement.eq_ignore_ascii_case("BEGIN")
    }
}

/// Column layout of a table, announced before its row events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
    /// One bit per column, LSB first.
    pub null_bitmap: Vec<u8>,
}

impl TableMapEvent {
    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn is_nullable(&self, column: usize) -> bool {
        bit_is_set(&self.null_bitmap, column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// One row image, positional over the table's columns. `None` marks a column
/// absent from the image (not in the present bitmap); NULL is
/// `Some(ColumnValue::Null)`.
pub type RowImage = Vec<Option<ColumnValue>>;

#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub kind: RowsKind,
    pub version: u8,
    pub table_id: u64,
    pub flags: u16,
    pub table: Arc<TableMapEvent>,
    pub rows: Vec<RowChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtidEvent {
    pub commit_flag: bool,
    pub sid: [u8; 16],
    pub gno: u64,
}

impl GtidEvent {
    /// `uuid:gno`
    pub fn gtid_string(&self) -> String {
        let h: String = self.sid.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}:{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32],
            self.gno
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVarEvent {
    pub name: String,
    /// `None` when the variable was set to NULL.
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    StartV3 {
        binlog_version: u16,
        server_version: String,
        create_timestamp: u32,
    },
    FormatDescription(FormatDescriptionEvent),
    Rotate(RotateEvent),
    Query(QueryEvent),
    Xid {
        xid: u64,
    },
    TableMap(Arc<TableMapEvent>),
    Rows(RowsEvent),
    Heartbeat {
        log_file: String,
    },
    Stop,
    Incident {
        kind: u16,
        message: String,
    },
    IntVar {
        kind: u8,
        value: u64,
    },
    Rand {
        seed1: u64,
        seed2: u64,
    },
    UserVar(UserVarEvent),
    BeginLoadQuery {
        file_id: u32,
        data_len: usize,
    },
    AppendBlock {
        file_id: u32,
        data_len: usize,
    },
    ExecuteLoadQuery {
        query: QueryEvent,
        file_id: u32,
    },
    Ignorable,
    RowsQuery {
        query: String,
    },
    Gtid(GtidEvent),
    AnonymousGtid(GtidEvent),
    PreviousGtids {
        data: Vec<u8>,
    },
    /// Well-formed event of a type this decoder does not interpret.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub body: EventBody,
}

/// LSB-first bitmap test.
pub fn bit_is_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap
        .get(idx / 8)
        .is_some_and(|byte| byte & (1 << (idx % 8)) != 0)
}

/// Number of bits set among the first `len` bits.
pub fn bits_set(bitmap: &[u8], len: usize) -> usize {
    (0..len).filter(|&i| bit_is_set(bitmap, i)).count()
}
