use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::binlog::event::{EventHeader, TableMapEvent};
use crate::binlog::{
    ChecksumAlgorithm, ColumnValue, DecoderState, EventBody, QueryEvent, RowImage, RowsEvent,
    RowsKind, decode_event,
};
use crate::error::{ReplicationError, Result};
use crate::event::{ChangeEvent, RowsChange};
use crate::metadata::{DEFAULT_BUFFER, MetadataHandle, Table};
use crate::pipeline::{Distributor, FailureNotifier, StageSignals};
use crate::position::LogPosition;
use crate::protocol::framing::PacketTransport;
use crate::protocol::messages::is_eof;

/// Routing decided at table-map time for the rows events that follow.
#[derive(Debug, Clone)]
struct TableRoute {
    /// `None` when the table is not replicated.
    table: Option<Table>,
    /// Indices of columns replicated as NULL.
    masked: Vec<usize>,
    /// Where the table map begins.
    position: LogPosition,
}

enum Flow {
    Continue,
    Stopped,
}

fn is_commit(q: &QueryEvent) -> bool {
    q.statement.trim().eq_ignore_ascii_case("COMMIT")
}

fn mask(image: &mut RowImage, masked: &[usize]) {
    for &idx in masked {
        if let Some(slot @ Some(_)) = image.get_mut(idx) {
            *slot = Some(ColumnValue::Null);
        }
    }
}

/// Reads the dump stream, decodes events and feeds the distributor.
pub struct EventLogReader<S> {
    transport: PacketTransport<S>,
    decoder: DecoderState,
    metadata: MetadataHandle,
    distributor: Distributor,
    routes: HashMap<u64, TableRoute>,
    position: LogPosition,
    relay_begin: bool,
    idle_timeout: Duration,
    events_read: u64,
}

impl<S> EventLogReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        transport: PacketTransport<S>,
        checksum: ChecksumAlgorithm,
        start: LogPosition,
        metadata: MetadataHandle,
        distributor: Distributor,
    ) -> Self {
        let mut decoder = DecoderState::new(checksum);
        decoder.set_log_file(start.file.clone());
        Self {
            transport,
            decoder,
            metadata,
            distributor,
            routes: HashMap::new(),
            position: start,
            relay_begin: false,
            idle_timeout: Duration::from_secs(30),
            events_read: 0,
        }
    }

    /// Relay `BEGIN` markers as untagged raw statements.
    pub fn with_relay_begin(mut self, relay: bool) -> Self {
        self.relay_begin = relay;
        self
    }

    /// Fail with a transport error when nothing, not even a heartbeat,
    /// arrives for this long. Zero disables the check.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Position just past the last event read.
    pub fn position(&self) -> &LogPosition {
        &self.position
    }

    pub async fn run(mut self, signals: StageSignals<Result<()>>, notifier: FailureNotifier) {
        let StageSignals { mut stop, ack } = signals;
        let result = self.run_loop(&mut stop).await;
        match &result {
            Ok(()) => info!(
                position = %self.position,
                events = self.events_read,
                "binlog reader stopped"
            ),
            Err(e) => {
                error!(position = %self.position, error = %e, "binlog reader failed");
                notifier.notify("reader", e.clone());
            }
        }
        let _ = ack.send(result);
    }

    async fn read_packet(&mut self) -> Result<bytes::Bytes> {
        if self.idle_timeout.is_zero() {
            return self.transport.read().await;
        }
        match tokio::time::timeout(self.idle_timeout, self.transport.read()).await {
            Ok(read) => read,
            Err(_) => Err(ReplicationError::Transport(format!(
                "no event or heartbeat within {:?}",
                self.idle_timeout
            ))),
        }
    }

    async fn run_loop(&mut self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            let packet = tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                read = self.read_packet() => read?,
            };
            if is_eof(&packet) {
                return Err(ReplicationError::Transport(
                    "source ended the binlog stream".into(),
                ));
            }
            let event = decode_event(&packet, &mut self.decoder)?;
            self.events_read += 1;
            if let Flow::Stopped = self.handle(event.header, event.body, stop).await? {
                return Ok(());
            }
        }
    }

    fn after(&self, header: &EventHeader) -> LogPosition {
        LogPosition::new(self.position.file.clone(), u64::from(header.next_position))
    }

    async fn handle(
        &mut self,
        header: EventHeader,
        body: EventBody,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let flow = match body {
            EventBody::Rotate(rotate) => {
                info!(file = %rotate.next_file, offset = rotate.position, "binlog rotated");
                self.position = LogPosition::new(rotate.next_file, rotate.position);
                return Ok(Flow::Continue);
            }
            EventBody::Heartbeat { log_file } => {
                trace!(%log_file, "heartbeat");
                return Ok(Flow::Continue);
            }
            EventBody::FormatDescription(fde) => {
                debug!(server_version = %fde.server_version, "format description");
                self.routes.clear();
                Flow::Continue
            }
            EventBody::TableMap(map) => {
                // Rows are tagged with the table map's start so a resume re-reads it.
                let at = LogPosition::new(self.position.file.clone(), header.position());
                self.route_table(&map, at, stop).await?
            }
            EventBody::Rows(rows) => self.emit_rows(rows, stop).await?,
            EventBody::Query(query) => self.on_query(query, &header, stop).await?,
            EventBody::Xid { xid } => {
                let event = ChangeEvent::Commit {
                    xid,
                    buffer: DEFAULT_BUFFER,
                    position: Some(self.after(&header)),
                };
                self.dispatch(event, stop).await?
            }
            _ => Flow::Continue,
        };
        if !header.is_artificial() {
            self.position.offset = u64::from(header.next_position);
        }
        Ok(flow)
    }

    async fn route_table(
        &mut self,
        map: &TableMapEvent,
        position: LogPosition,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let snapshot = Arc::clone(self.metadata.snapshot());
        let table = if snapshot.schema(&map.schema).is_none() {
            None
        } else {
            let known = snapshot.lookup(&map.schema, &map.table);
            match known {
                Some(t) if t.columns.len() == map.column_count() => Some(t.clone()),
                _ => {
                    debug!(
                        schema = %map.schema,
                        table = %map.table,
                        known = known.is_some(),
                        "table unknown or changed, refreshing metadata"
                    );
                    let refreshed = tokio::select! {
                        biased;
                        _ = stop.changed() => return Ok(Flow::Stopped),
                        r = self.metadata.refresh(&map.schema, Some(map.table.as_str())) => r?,
                    };
                    match &refreshed {
                        None => warn!(
                            schema = %map.schema,
                            table = %map.table,
                            "table not in catalog, skipping its rows"
                        ),
                        Some(t) if t.columns.len() != map.column_count() => warn!(
                            schema = %map.schema,
                            table = %map.table,
                            catalog = t.columns.len(),
                            binlog = map.column_count(),
                            "catalog and binlog disagree on column count"
                        ),
                        Some(_) => {}
                    }
                    refreshed
                }
            }
        };

        let masked = table
            .as_ref()
            .map(|t| {
                t.columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.excluded_from_replication)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();
        self.routes.insert(
            map.table_id,
            TableRoute {
                table,
                masked,
                position,
            },
        );
        Ok(Flow::Continue)
    }

    async fn emit_rows(
        &mut self,
        rows: RowsEvent,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let Some(route) = self.routes.get(&rows.table_id) else {
            trace!(table_id = rows.table_id, "rows without a routed table map");
            return Ok(Flow::Continue);
        };
        let Some(table) = &route.table else {
            return Ok(Flow::Continue);
        };
        if table.excluded_from_replication {
            trace!(table = %table.qualified_name(), "excluded table");
            return Ok(Flow::Continue);
        }
        if rows.kind == RowsKind::Delete && !table.delete_enabled {
            trace!(table = %table.qualified_name(), "deletes not enabled");
            return Ok(Flow::Continue);
        }

        let mut before = Vec::new();
        let mut after = Vec::new();
        for change in rows.rows {
            if let Some(mut image) = change.before {
                mask(&mut image, &route.masked);
                before.push(image);
            }
            if let Some(mut image) = change.after {
                mask(&mut image, &route.masked);
                after.push(image);
            }
        }
        let change = RowsChange {
            schema: table.schema.clone(),
            table: table.name.clone(),
            columns: Arc::clone(&table.columns),
            before,
            after,
            buffer: table.buffer_id,
            position: Some(route.position.clone()),
        };
        let event = match rows.kind {
            RowsKind::Write => ChangeEvent::Insert(change),
            RowsKind::Update => ChangeEvent::Update(change),
            RowsKind::Delete => ChangeEvent::Delete(change),
        };
        self.dispatch(event, stop).await
    }

    async fn on_query(
        &mut self,
        query: QueryEvent,
        header: &EventHeader,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        if query.is_begin() {
            if !self.relay_begin {
                return Ok(Flow::Continue);
            }
            let event = ChangeEvent::RawStatement {
                schema: query.schema,
                statement: query.statement,
                buffer: DEFAULT_BUFFER,
                position: None,
            };
            return self.dispatch(event, stop).await;
        }
        // Non-transactional engines end a statement group with a COMMIT query
        // instead of an Xid.
        if is_commit(&query) {
            let event = ChangeEvent::Commit {
                xid: 0,
                buffer: DEFAULT_BUFFER,
                position: Some(self.after(header)),
            };
            return self.dispatch(event, stop).await;
        }

        let Some(buffer) = self
            .metadata
            .snapshot()
            .schema(&query.schema)
            .map(|s| s.buffer_id)
        else {
            trace!(schema = %query.schema, "statement outside replicated schemas");
            return Ok(Flow::Continue);
        };
        let event = ChangeEvent::RawStatement {
            schema: query.schema.clone(),
            statement: query.statement,
            buffer,
            position: Some(self.after(header)),
        };
        if let Flow::Stopped = self.dispatch(event, stop).await? {
            return Ok(Flow::Stopped);
        }

        // DDL may have changed columns.
        tokio::select! {
            biased;
            _ = stop.changed() => Ok(Flow::Stopped),
            r = self.metadata.refresh(&query.schema, None) => r.map(|_| Flow::Continue),
        }
    }

    async fn dispatch(
        &mut self,
        event: ChangeEvent,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        tokio::select! {
            biased;
            _ = stop.changed() => Ok(Flow::Stopped),
            r = self.distributor.dispatch(event) => r.map(|()| Flow::Continue),
        }
    }
}
