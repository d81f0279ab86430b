//! MySQL binlog replication client.
//!
//! This module connects to a source as a replica and drives the pipeline that
//! applies its changes.
//!
//! # Overview
//!
//! [`SourceConnection`] authenticates, negotiates binlog checksums, registers
//! as a replica and starts the binlog dump. [`EventLogReader`] decodes the
//! stream into change events. [`Replicator`] starts everything and hands back a
//! [`ReplicatorHandle`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  shutdown()   ┌─────────────────────┐
//! │                 │──────────────►│ ShutdownCoordinator │
//! │  Your App       │               └──────────┬──────────┘
//! │                 │◄──────────────           │ stop / ack
//! └─────────────────┘ ShutdownReport           ▼
//!                               ┌────────────────────────────┐
//!   ┌───────────┐  binlog dump  │ reader → buffers → workers │──► Destination
//!   │   MySQL   │──────────────►│     metadata, scheduler    │
//!   └───────────┘               └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mysqlwire_replication::{
//!     FileCheckpointStore, InformationSchemaCatalog, LogDestination, ReplicationConfig,
//!     Replicator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ReplicationConfig::default();
//!     config.user = "repl".into();
//!     config.password = "secret".into();
//!     config.rules.schemas = vec!["shop".into()];
//!
//!     let catalog = Arc::new(InformationSchemaCatalog::connect(&config).await?);
//!     let replicator = Replicator::new(
//!         config,
//!         catalog,
//!         Arc::new(LogDestination),
//!         Arc::new(FileCheckpointStore::new("checkpoint.json")),
//!     );
//!
//!     let handle = replicator.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     let report = handle.join().await?;
//!     println!("stopped at {:?}", report.checkpoint);
//!     Ok(())
//! }
//! ```

mod connection;
mod reader;
mod replicator;

pub use connection::SourceConnection;
pub use reader::EventLogReader;
pub use replicator::{Replicator, ReplicatorHandle};
