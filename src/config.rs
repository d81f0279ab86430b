use std::time::Duration;

use serde::Deserialize;

use crate::position::LogPosition;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub password: String,

    /// Server id announced with COM_REGISTER_SLAVE; must be unique among replicas.
    pub server_id: u32,

    /// Where to start when no checkpoint has been persisted yet.
    /// `None` means "current master position" (SHOW MASTER STATUS).
    pub start_position: Option<LogPosition>,

    /// Heartbeat period requested from the source.
    pub heartbeat_interval: Duration,

    /// If no packet (event or heartbeat) arrives within this interval, treat it as an error.
    pub idle_timeout: Duration,

    /// Bounded queue size (#events) per buffer between the reader and its worker.
    pub buffer_events: usize,

    /// Pause between scheduler ticks. `Duration::ZERO` ticks as fast as the
    /// workers accept permits.
    pub tick_interval: Duration,

    /// Relay `BEGIN` statements downstream as untagged raw statements.
    pub relay_begin: bool,

    /// Filter and priority rules applied to the catalog.
    pub rules: MetadataRules,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            server_id: 1001,
            start_position: None,

            heartbeat_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            buffer_events: 8192,
            tick_interval: Duration::from_millis(1),
            relay_begin: false,

            rules: MetadataRules::default(),
        }
    }
}

/// Which schemas/tables/columns replicate, and into which buffer.
///
/// Buffer numbers are integers starting from 0 without gaps. Frequencies say
/// how often a buffer plays relative to the default buffer 0, whose frequency
/// is always 1: buffers `0/1, 1/10, 2/100` mean buffer 1 plays on every 10th
/// tick and buffer 2 on every 100th.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataRules {
    /// Schemas to replicate. Everything else is ignored.
    pub schemas: Vec<String>,
    /// `schema.table` entries never replicated.
    pub excluded_tables: Vec<String>,
    /// `schema.table.column` entries replicated as NULL.
    pub excluded_columns: Vec<String>,
    /// `schema.table` entries whose deletes are replicated.
    pub delete_enabled: Vec<String>,
    /// Buffer layout. An empty list means a single default buffer.
    pub buffers: Vec<BufferRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferRule {
    pub number: usize,
    pub frequency: u32,
    /// Schemas pinned to this buffer.
    #[serde(default)]
    pub schemas: Vec<String>,
    /// `schema.table` entries pinned to this buffer; override the schema's buffer.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl BufferRule {
    pub fn new(number: usize, frequency: u32) -> Self {
        Self {
            number,
            frequency,
            schemas: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn with_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemas.extend(schemas.into_iter().map(Into::into));
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }
}
