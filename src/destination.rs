//! Where change events are applied.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::{ReplicationError, Result};
use crate::event::ChangeEvent;

/// Applies change events downstream.
///
/// Each buffer worker calls into the destination from its own task, so calls
/// for different buffers may overlap. Within one buffer, calls arrive one at a
/// time in wire order.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Apply an insert, update, delete or commit.
    async fn play(&self, event: &ChangeEvent) -> Result<()>;

    /// Run a statement passed through from the source.
    async fn execute_raw(&self, schema: &str, statement: &str) -> Result<()>;
}

/// Logs every event at INFO and applies nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDestination;

#[async_trait]
impl Destination for LogDestination {
    async fn play(&self, event: &ChangeEvent) -> Result<()> {
        info!(
            buffer = event.buffer(),
            position = ?event.position(),
            "{event}"
        );
        Ok(())
    }

    async fn execute_raw(&self, schema: &str, statement: &str) -> Result<()> {
        info!(schema, "{statement}");
        Ok(())
    }
}

/// Records everything it is given. A table can be marked failing to exercise
/// play-error handling.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    events: Mutex<Vec<ChangeEvent>>,
    failing_table: Mutex<Option<String>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every rows event for `table` from now on.
    pub fn fail_table(&self, table: impl Into<String>) {
        *self.failing_table.lock().unwrap_or_else(|p| p.into_inner()) = Some(table.into());
    }

    /// Everything applied so far, raw statements included.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn record(&self, event: ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn play(&self, event: &ChangeEvent) -> Result<()> {
        let failing = self
            .failing_table
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let (Some(failing), Some(rows)) = (failing, event.rows())
            && rows.table == failing
        {
            return Err(ReplicationError::Play {
                buffer: event.buffer(),
                message: format!("table {}.{} rejected {}", rows.schema, rows.table, event.kind()),
            });
        }
        self.record(event.clone());
        Ok(())
    }

    async fn execute_raw(&self, schema: &str, statement: &str) -> Result<()> {
        self.record(ChangeEvent::RawStatement {
            schema: schema.to_string(),
            statement: statement.to_string(),
            buffer: 0,
            position: None,
        });
        Ok(())
    }
}
