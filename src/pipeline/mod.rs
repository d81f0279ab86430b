//! Concurrent stages between the binlog reader and the destination.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────┐ events ┌──────────┐
//!                ┌──►│ queue 0     │───────►│ worker 0 │──┐
//! ┌────────────┐ │   └─────────────┘        └──────────┘  │
//! │ EventLog   │─┤   ┌─────────────┐        ┌──────────┐  │   ┌─────────────┐
//! │ Reader     │ └──►│ queue k     │───────►│ worker k │──┼──►│ Destination │
//! └────────────┘     └─────────────┘        └──────────┘  │   └─────────────┘
//!   Distributor                                 ▲  permits
//!                              ┌────────────────┴──┐
//!                              │ ControlScheduler  │
//!                              └───────────────────┘
//! ```
//!
//! Every stage gets a `watch` stop signal and answers on a `oneshot`
//! acknowledgment exactly once, including when it exits on an error. Failures
//! are also reported to the [`ShutdownCoordinator`] so it can stop the rest.

pub mod buffer;
pub mod distributor;
pub mod scheduler;
pub mod shutdown;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{ReplicationError, Result};

pub use buffer::{BufferReport, BufferWorker};
pub use distributor::Distributor;
pub use scheduler::{ControlScheduler, run_scheduler};
pub use shutdown::{BufferStage, ShutdownCoordinator, ShutdownReport, ShutdownTrigger};

/// Coordinator-side end of a stage: stop it and collect its acknowledgment.
#[derive(Debug)]
pub struct Stage<T> {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    ack_rx: oneshot::Receiver<T>,
}

/// Stage-side end: the stop signal to watch and the acknowledgment to send.
#[derive(Debug)]
pub struct StageSignals<T> {
    pub stop: watch::Receiver<bool>,
    pub ack: oneshot::Sender<T>,
}

pub fn stage<T>(name: &'static str) -> (Stage<T>, StageSignals<T>) {
    let (stop_tx, stop) = watch::channel(false);
    let (ack, ack_rx) = oneshot::channel();
    (
        Stage {
            name,
            stop_tx,
            ack_rx,
        },
        StageSignals { stop, ack },
    )
}

impl<T> Stage<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signal_stop(&self) {
        self.stop_tx.send_replace(true);
        debug!(stage = self.name, "stop requested");
    }

    /// Wait for the acknowledgment without signalling.
    pub async fn join(self) -> Result<T> {
        self.ack_rx.await.map_err(|_| {
            ReplicationError::Task(format!("{} stage exited without acknowledging", self.name))
        })
    }

    /// Signal stop and wait for the acknowledgment.
    pub async fn stop(self) -> Result<T> {
        self.signal_stop();
        self.join().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownCommand {
    Terminate,
    StageFailed {
        stage: &'static str,
        error: ReplicationError,
    },
}

/// Lets a stage report a failure without keeping the command channel open.
#[derive(Debug, Clone)]
pub struct FailureNotifier {
    commands: mpsc::WeakSender<ShutdownCommand>,
}

impl FailureNotifier {
    pub fn new(commands: &mpsc::Sender<ShutdownCommand>) -> Self {
        Self {
            commands: commands.downgrade(),
        }
    }

    pub fn notify(&self, stage: &'static str, error: ReplicationError) {
        let Some(tx) = self.commands.upgrade() else {
            debug!(stage, "coordinator gone, failure not reported");
            return;
        };
        // A full channel already holds a shutdown request.
        let _ = tx.try_send(ShutdownCommand::StageFailed { stage, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_returns_acknowledgment() {
        let (stage, signals) = stage::<u32>("sample");
        let task = tokio::spawn(async move {
            let StageSignals { mut stop, ack } = signals;
            let _ = stop.changed().await;
            let _ = ack.send(7);
        });
        assert_eq!(stage.name(), "sample");
        assert_eq!(stage.stop().await.unwrap(), 7);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_acknowledgment_is_task_error() {
        let (stage, signals) = stage::<()>("vanished");
        drop(signals);
        let err = stage.stop().await.unwrap_err();
        assert!(matches!(err, ReplicationError::Task(m) if m.contains("vanished")));
    }

    #[tokio::test]
    async fn notifier_does_not_keep_channel_open() {
        let (tx, mut rx) = mpsc::channel(4);
        let notifier = FailureNotifier::new(&tx);
        notifier.notify("reader", ReplicationError::Transport("reset".into()));
        assert!(matches!(
            rx.recv().await,
            Some(ShutdownCommand::StageFailed { stage: "reader", .. })
        ));

        drop(tx);
        assert!(rx.recv().await.is_none());
        notifier.notify("reader", ReplicationError::Transport("again".into()));
    }
}
