use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointRecord, CheckpointStore, resume_position};
use crate::error::{ReplicationError, Result};
use crate::pipeline::{BufferReport, ShutdownCommand, Stage};
use crate::position::LogPosition;

/// A buffer worker's stage plus the sender used for its final permit.
#[derive(Debug)]
pub struct BufferStage {
    pub stage: Stage<BufferReport>,
    pub permits: mpsc::Sender<()>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownTrigger {
    /// `ReplicatorHandle::shutdown` was called.
    Terminated,
    StageFailed {
        stage: &'static str,
        error: ReplicationError,
    },
    /// Every handle was dropped.
    HandlesDropped,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// Ticks the scheduler completed, if it stopped cleanly.
    pub ticks: Option<u64>,
    pub buffers: Vec<BufferReport>,
    /// Resume position computed at shutdown.
    pub checkpoint: Option<LogPosition>,
    pub checkpoint_saved: bool,
    /// Every distinct error seen while running or stopping.
    pub errors: Vec<ReplicationError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&ReplicationError> {
        self.errors.first()
    }
}

fn record(errors: &mut Vec<ReplicationError>, e: ReplicationError) {
    if !errors.contains(&e) {
        errors.push(e);
    }
}

/// Waits for a shutdown trigger, then stops every stage in order and
/// persists the resume checkpoint.
pub struct ShutdownCoordinator {
    commands: mpsc::Receiver<ShutdownCommand>,
    reader: Stage<Result<()>>,
    metadata: Stage<Result<()>>,
    scheduler: Stage<Result<u64>>,
    buffers: Vec<BufferStage>,
    checkpoints: Arc<dyn CheckpointStore>,
    previous: Option<LogPosition>,
}

impl ShutdownCoordinator {
    pub fn new(
        commands: mpsc::Receiver<ShutdownCommand>,
        reader: Stage<Result<()>>,
        metadata: Stage<Result<()>>,
        scheduler: Stage<Result<u64>>,
        buffers: Vec<BufferStage>,
        checkpoints: Arc<dyn CheckpointStore>,
        previous: Option<LogPosition>,
    ) -> Self {
        Self {
            commands,
            reader,
            metadata,
            scheduler,
            buffers,
            checkpoints,
            previous,
        }
    }

    pub async fn run(mut self) -> ShutdownReport {
        let trigger = match self.commands.recv().await {
            Some(ShutdownCommand::Terminate) => ShutdownTrigger::Terminated,
            Some(ShutdownCommand::StageFailed { stage, error }) => {
                ShutdownTrigger::StageFailed { stage, error }
            }
            None => ShutdownTrigger::HandlesDropped,
        };
        match &trigger {
            ShutdownTrigger::StageFailed { stage, error } => {
                warn!(stage, error = %error, "stage failed, shutting down")
            }
            other => info!(trigger = ?other, "shutting down"),
        }
        self.shutdown(trigger).await
    }

    async fn shutdown(self, trigger: ShutdownTrigger) -> ShutdownReport {
        let mut errors = Vec::new();
        if let ShutdownTrigger::StageFailed { error, .. } = &trigger {
            record(&mut errors, error.clone());
        }

        match self.reader.stop().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => record(&mut errors, e),
        }
        match self.metadata.stop().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => record(&mut errors, e),
        }
        let ticks = match self.scheduler.stop().await {
            Ok(Ok(ticks)) => Some(ticks),
            Ok(Err(e)) | Err(e) => {
                record(&mut errors, e);
                None
            }
        };

        for b in &self.buffers {
            b.stage.signal_stop();
            let _ = b.permits.try_send(());
        }
        let mut reports = Vec::with_capacity(self.buffers.len());
        for b in self.buffers {
            match b.stage.join().await {
                Ok(report) => {
                    if let Some(e) = &report.error {
                        record(&mut errors, e.clone());
                    }
                    reports.push(report);
                }
                Err(e) => record(&mut errors, e),
            }
        }

        let checkpoint = resume_position(
            reports.iter().filter_map(BufferReport::resume_floor),
            self.previous.as_ref(),
        );
        let mut checkpoint_saved = false;
        if let Some(position) = &checkpoint {
            let saved = match CheckpointRecord::try_from(position) {
                Ok(record) => self.checkpoints.save(&record).await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(()) => {
                    checkpoint_saved = true;
                    info!(%position, "checkpoint persisted");
                }
                Err(e) => {
                    let e = match e {
                        ReplicationError::Shutdown(_) => e,
                        other => ReplicationError::Shutdown(other.to_string()),
                    };
                    error!(%position, error = %e, "checkpoint not persisted");
                    record(&mut errors, e);
                }
            }
        }

        ShutdownReport {
            trigger,
            ticks,
            buffers: reports,
            checkpoint,
            checkpoint_saved,
            errors,
        }
    }
}
