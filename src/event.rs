//! Change events handed to a [`Destination`](crate::destination::Destination).

use std::fmt;
use std::sync::Arc;

use crate::binlog::{ColumnValue, RowImage};
use crate::metadata::Column;
use crate::position::LogPosition;

/// One row, positional over [`RowsChange::columns`]. `None` marks a column the
/// source left out of the image; excluded columns are `Some(ColumnValue::Null)`.
pub type Row = RowImage;

/// Rows of one binlog rows event, resolved against the table's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsChange {
    pub schema: String,
    pub table: String,
    /// Column metadata as of the table map that preceded the rows.
    pub columns: Arc<[Column]>,
    /// Before images (update, delete).
    pub before: Vec<Row>,
    /// After images (insert, update).
    pub after: Vec<Row>,
    pub buffer: usize,
    /// Where the table map for these rows begins. Resuming there replays them.
    pub position: Option<LogPosition>,
}

impl RowsChange {
    pub fn row_count(&self) -> usize {
        self.before.len().max(self.after.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of `column` in the `row`-th after image.
    pub fn after_value(&self, row: usize, column: &str) -> Option<&ColumnValue> {
        let idx = self.column_index(column)?;
        self.after.get(row)?.get(idx)?.as_ref()
    }

    /// Value of `column` in the `row`-th before image.
    pub fn before_value(&self, row: usize, column: &str) -> Option<&ColumnValue> {
        let idx = self.column_index(column)?;
        self.before.get(row)?.get(idx)?.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(RowsChange),
    Update(RowsChange),
    Delete(RowsChange),
    /// Transaction commit (Xid). Always routed to the default buffer.
    Commit {
        xid: u64,
        buffer: usize,
        position: Option<LogPosition>,
    },
    /// A statement passed through verbatim, usually DDL. `position` points
    /// past the statement; `BEGIN` markers are relayed without one.
    RawStatement {
        schema: String,
        statement: String,
        buffer: usize,
        position: Option<LogPosition>,
    },
}

impl ChangeEvent {
    pub fn buffer(&self) -> usize {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) | ChangeEvent::Delete(r) => r.buffer,
            ChangeEvent::Commit { buffer, .. } | ChangeEvent::RawStatement { buffer, .. } => *buffer,
        }
    }

    pub fn position(&self) -> Option<&LogPosition> {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) | ChangeEvent::Delete(r) => {
                r.position.as_ref()
            }
            ChangeEvent::Commit { position, .. } | ChangeEvent::RawStatement { position, .. } => {
                position.as_ref()
            }
        }
    }

    pub fn rows(&self) -> Option<&RowsChange> {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) | ChangeEvent::Delete(r) => Some(r),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert(_) => "insert",
            ChangeEvent::Update(_) => "update",
            ChangeEvent::Delete(_) => "delete",
            ChangeEvent::Commit { .. } => "commit",
            ChangeEvent::RawStatement { .. } => "statement",
        }
    }

    pub(crate) fn set_buffer(&mut self, id: usize) {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) | ChangeEvent::Delete(r) => {
                r.buffer = id
            }
            ChangeEvent::Commit { buffer, .. } | ChangeEvent::RawStatement { buffer, .. } => {
                *buffer = id
            }
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) | ChangeEvent::Delete(r) => write!(
                f,
                "{} {}.{} ({} rows)",
                self.kind(),
                r.schema,
                r.table,
                r.row_count()
            ),
            ChangeEvent::Commit { xid, .. } => write!(f, "commit xid={xid}"),
            ChangeEvent::RawStatement {
                schema, statement, ..
            } => write!(f, "statement [{schema}] {statement}"),
        }
    }
}
