use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::destination::Destination;
use crate::error::{ReplicationError, Result};
use crate::event::ChangeEvent;
use crate::pipeline::{FailureNotifier, StageSignals};
use crate::position::LogPosition;

/// What a buffer worker did before it stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferReport {
    pub buffer: usize,
    /// Position of the last event applied successfully.
    pub last_applied: Option<LogPosition>,
    /// Position of the first event received but never applied.
    pub first_unapplied: Option<LogPosition>,
    pub applied: u64,
    pub discarded: u64,
    /// The play failure that took this buffer out of service.
    pub error: Option<ReplicationError>,
}

impl BufferReport {
    fn new(buffer: usize) -> Self {
        Self {
            buffer,
            ..Default::default()
        }
    }

    fn unapplied(&mut self, event: &ChangeEvent) {
        if self.first_unapplied.is_none() {
            self.first_unapplied = event.position().cloned();
        }
    }

    /// Lowest position this buffer needs replayed from, if it saw anything.
    pub fn resume_floor(&self) -> Option<&LogPosition> {
        self.last_applied.as_ref().or(self.first_unapplied.as_ref())
    }
}

/// Plays one buffer's events, one per permit.
pub struct BufferWorker {
    id: usize,
    events: mpsc::Receiver<ChangeEvent>,
    permits: mpsc::Receiver<()>,
    destination: Arc<dyn Destination>,
    notifier: FailureNotifier,
}

impl BufferWorker {
    pub fn new(
        id: usize,
        events: mpsc::Receiver<ChangeEvent>,
        permits: mpsc::Receiver<()>,
        destination: Arc<dyn Destination>,
        notifier: FailureNotifier,
    ) -> Self {
        Self {
            id,
            events,
            permits,
            destination,
            notifier,
        }
    }

    async fn apply(&self, event: &ChangeEvent) -> Result<()> {
        let result = match event {
            ChangeEvent::RawStatement {
                schema, statement, ..
            } => self.destination.execute_raw(schema, statement).await,
            other => self.destination.play(other).await,
        };
        result.map_err(|e| match e {
            ReplicationError::Play { message, .. } => ReplicationError::Play {
                buffer: self.id,
                message,
            },
            other => ReplicationError::Play {
                buffer: self.id,
                message: other.to_string(),
            },
        })
    }

    async fn discard_until_stopped(
        &mut self,
        stop: &mut watch::Receiver<bool>,
        report: &mut BufferReport,
    ) {
        let mut permits_open = true;
        loop {
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                biased;
                _ = stop.changed() => return,
                event = self.events.recv() => match event {
                    Some(event) => {
                        trace!(buffer = self.id, kind = event.kind(), "discarding");
                        report.unapplied(&event);
                        report.discarded += 1;
                    }
                    None => return,
                },
                p = self.permits.recv(), if permits_open => permits_open = p.is_some(),
            }
        }
    }

    /// Run until stopped. After the first play failure the worker applies
    /// nothing more but keeps draining events and permits as they arrive, so
    /// neither the reader nor the scheduler ever waits on a dead buffer.
    pub async fn run(mut self, signals: StageSignals<BufferReport>) {
        let StageSignals { mut stop, ack } = signals;
        let mut report = BufferReport::new(self.id);

        loop {
            if *stop.borrow() {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = stop.changed() => break,
                p = self.permits.recv() => p,
            };
            if permit.is_none() || *stop.borrow() {
                break;
            }
            let Ok(event) = self.events.try_recv() else {
                continue;
            };

            match self.apply(&event).await {
                Ok(()) => {
                    report.applied += 1;
                    if let Some(p) = event.position() {
                        report.last_applied = Some(p.clone());
                    }
                }
                Err(e) => {
                    error!(buffer = self.id, event = %event, error = %e, "play failed, buffer out of service");
                    report.unapplied(&event);
                    report.discarded += 1;
                    report.error = Some(e.clone());
                    self.notifier.notify("buffer", e);
                    self.discard_until_stopped(&mut stop, &mut report).await;
                    break;
                }
            }
        }

        // Note where this buffer's unplayed backlog starts.
        if report.resume_floor().is_none() {
            while let Ok(event) = self.events.try_recv() {
                if event.position().is_some() {
                    report.unapplied(&event);
                    break;
                }
            }
        }
        if report.error.is_some() {
            warn!(buffer = self.id, discarded = report.discarded, "buffer stopped after failure");
        }
        debug!(buffer = self.id, applied = report.applied, last_applied = ?report.last_applied, "buffer stopped");
        let _ = ack.send(report);
    }
}
