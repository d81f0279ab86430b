#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod binlog;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod destination;
pub mod error;
pub mod event;
pub mod metadata;
pub mod pipeline;
pub mod position;
pub mod protocol;

pub use checkpoint::{CheckpointRecord, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use client::{EventLogReader, Replicator, ReplicatorHandle, SourceConnection};
pub use config::{BufferRule, MetadataRules, ReplicationConfig};
pub use destination::{Destination, LogDestination, MemoryDestination};
pub use error::{ReplicationError, Result};
pub use event::{ChangeEvent, Row, RowsChange};
pub use metadata::{
    CatalogColumn, CatalogTable, InformationSchemaCatalog, MetadataCatalog, StaticCatalog,
};
pub use pipeline::{ShutdownReport, ShutdownTrigger};
pub use position::LogPosition;
