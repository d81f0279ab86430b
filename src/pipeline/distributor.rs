use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{ReplicationError, Result};
use crate::event::ChangeEvent;
use crate::metadata::DEFAULT_BUFFER;

/// Routes events to the bounded queue of their buffer.
#[derive(Debug, Clone)]
pub struct Distributor {
    queues: Vec<mpsc::Sender<ChangeEvent>>,
}

impl Distributor {
    pub fn new(queues: Vec<mpsc::Sender<ChangeEvent>>) -> Self {
        Self { queues }
    }

    pub fn buffer_count(&self) -> usize {
        self.queues.len()
    }

    /// Queue `event`, waiting while the target queue is full. Events for an
    /// unknown buffer go to the default buffer.
    pub async fn dispatch(&self, mut event: ChangeEvent) -> Result<()> {
        let mut id = event.buffer();
        if id >= self.queues.len() {
            warn!(buffer = id, "no such buffer, routing to default");
            id = DEFAULT_BUFFER;
            event.set_buffer(id);
        }
        let queue = self
            .queues
            .get(id)
            .ok_or_else(|| ReplicationError::Internal("distributor has no buffers".into()))?;
        trace!(buffer = id, kind = event.kind(), "dispatch");
        queue
            .send(event)
            .await
            .map_err(|_| ReplicationError::Task(format!("buffer {id} queue closed")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn commit(xid: u64, buffer: usize) -> ChangeEvent {
        ChangeEvent::Commit {
            xid,
            buffer,
            position: None,
        }
    }

    #[tokio::test]
    async fn routes_by_buffer_and_defaults_unknown() {
        let (tx0, mut rx0) = mpsc::channel(4);
        let (tx1, mut rx1) = mpsc::channel(4);
        let d = Distributor::new(vec![tx0, tx1]);
        assert_eq!(d.buffer_count(), 2);

        d.dispatch(commit(1, 1)).await.unwrap();
        d.dispatch(commit(2, 0)).await.unwrap();
        d.dispatch(commit(3, 7)).await.unwrap();

        assert_eq!(rx1.recv().await, Some(commit(1, 1)));
        assert_eq!(rx0.recv().await, Some(commit(2, 0)));
        assert_eq!(rx0.recv().await, Some(commit(3, 0)));
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let (tx, mut rx) = mpsc::channel(1);
        let d = Distributor::new(vec![tx]);
        d.dispatch(commit(1, 0)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), d.dispatch(commit(2, 0))).await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await, Some(commit(1, 0)));
        d.dispatch(commit(3, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_queue_is_task_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = Distributor::new(vec![tx])
            .dispatch(commit(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Task(_)));
    }
}
