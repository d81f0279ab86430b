use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{ReplicationError, Result};
use crate::metadata::DEFAULT_BUFFER;
use crate::pipeline::{FailureNotifier, StageSignals};

/// Decides which buffers may play on each tick.
///
/// Buffer 0 fires every tick. Any other buffer counts down from its frequency
/// and fires when the count reaches zero, then starts over.
#[derive(Debug, Clone)]
pub struct ControlScheduler {
    frequencies: Vec<u32>,
    countdowns: Vec<u32>,
}

impl ControlScheduler {
    pub fn new(frequencies: &[u32]) -> Self {
        Self {
            frequencies: frequencies.to_vec(),
            countdowns: frequencies.to_vec(),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.frequencies.len()
    }

    /// Advance one tick and return the buffers that get a permit.
    pub fn tick(&mut self) -> Vec<usize> {
        let mut fired = Vec::with_capacity(self.countdowns.len());
        for (id, countdown) in self.countdowns.iter_mut().enumerate() {
            if id == DEFAULT_BUFFER {
                fired.push(id);
                continue;
            }
            *countdown = countdown.saturating_sub(1);
            if *countdown == 0 {
                fired.push(id);
                *countdown = self.frequencies[id].max(1);
            }
        }
        fired
    }
}

/// Scheduler task. Hands out permits until stopped; acknowledges with the
/// number of completed ticks.
pub async fn run_scheduler(
    mut scheduler: ControlScheduler,
    permits: Vec<mpsc::Sender<()>>,
    tick_interval: Duration,
    signals: StageSignals<Result<u64>>,
    notifier: FailureNotifier,
) {
    let StageSignals { mut stop, ack } = signals;
    let mut ticks = 0u64;

    let result: Result<u64> = 'run: loop {
        if *stop.borrow() {
            break Ok(ticks);
        }
        for id in scheduler.tick() {
            let Some(permit) = permits.get(id) else {
                break 'run Err(ReplicationError::Internal(format!(
                    "no permit channel for buffer {id}"
                )));
            };
            tokio::select! {
                biased;
                _ = stop.changed() => break 'run Ok(ticks),
                sent = permit.send(()) => {
                    if sent.is_err() {
                        break 'run Err(ReplicationError::Task(format!(
                            "permit channel for buffer {id} closed"
                        )));
                    }
                }
            }
        }
        ticks += 1;

        if tick_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                _ = stop.changed() => break Ok(ticks),
                _ = tokio::time::sleep(tick_interval) => {}
            }
        }
    };

    match &result {
        Ok(ticks) => debug!(ticks, "scheduler stopped"),
        Err(e) => {
            error!(error = %e, "scheduler failed");
            notifier.notify("scheduler", e.clone());
        }
    }
    let _ = ack.send(result);
}
