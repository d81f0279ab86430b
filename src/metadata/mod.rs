//! What replicates, and into which buffer.
//!
//! A [`MetadataCatalog`] supplies table and column definitions; the
//! [`MetadataRules`](crate::config::MetadataRules) filter them and assign
//! buffers. The result is an immutable [`ReplicationMetadata`] tree.
//!
//! # Ownership
//!
//! ```text
//! ┌──────────────┐  RefreshRequest   ┌───────────────────┐
//! │ EventLog     │──────────────────►│ MetadataResponder │──► MetadataCatalog
//! │ Reader       │◄──────────────────│ (sole writer)     │
//! └──────────────┘  Arc snapshot     └───────────────────┘
//! ```
//!
//! The reader never mutates the tree. When it meets a table it does not know,
//! or passes a DDL statement through, it asks the responder to reload and
//! adopts the snapshot it gets back.

pub mod catalog;
pub mod model;
pub mod store;

pub use catalog::{
    CatalogColumn, CatalogTable, InformationSchemaCatalog, MetadataCatalog, StaticCatalog,
};
pub use model::{Column, DEFAULT_BUFFER, ReplicationMetadata, Schema, Table};
pub use store::{MetadataHandle, MetadataResponder, RefreshRequest, ReplicationMetadataStore};
