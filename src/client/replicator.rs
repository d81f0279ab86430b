use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::binlog::ChecksumAlgorithm;
use crate::checkpoint::CheckpointStore;
use crate::client::connection::SourceConnection;
use crate::client::reader::EventLogReader;
use crate::config::ReplicationConfig;
use crate::destination::Destination;
use crate::error::{ReplicationError, Result};
use crate::metadata::{MetadataCatalog, ReplicationMetadataStore};
use crate::pipeline::{
    BufferStage, BufferWorker, ControlScheduler, Distributor, FailureNotifier, ShutdownCommand,
    ShutdownCoordinator, ShutdownReport, run_scheduler, stage,
};
use crate::position::LogPosition;
use crate::protocol::framing::PacketTransport;

/// Wires a source, a catalog, a destination and a checkpoint store together.
pub struct Replicator {
    config: ReplicationConfig,
    catalog: Arc<dyn MetadataCatalog>,
    destination: Arc<dyn Destination>,
    checkpoints: Arc<dyn CheckpointStore>,
}

/// Control over a running replicator.
///
/// Dropping every handle has the same effect as calling
/// [`shutdown`](Self::shutdown).
pub struct ReplicatorHandle {
    commands: mpsc::Sender<ShutdownCommand>,
    join: JoinHandle<ShutdownReport>,
    start: LogPosition,
}

impl ReplicatorHandle {
    /// Position the binlog dump started from.
    pub fn start_position(&self) -> &LogPosition {
        &self.start
    }

    /// Ask the coordinator to stop every stage and persist the checkpoint.
    pub async fn shutdown(&self) {
        // An error means the coordinator is already shutting down.
        let _ = self.commands.send(ShutdownCommand::Terminate).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the replicator to finish, either after [`shutdown`](Self::shutdown)
    /// or after a stage failed.
    pub async fn join(self) -> Result<ShutdownReport> {
        let Self { commands, join, .. } = self;
        let report = join
            .await
            .map_err(|e| ReplicationError::Task(format!("join error: {e}")));
        drop(commands);
        report
    }
}

impl Replicator {
    pub fn new(
        config: ReplicationConfig,
        catalog: Arc<dyn MetadataCatalog>,
        destination: Arc<dyn Destination>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            catalog,
            destination,
            checkpoints,
        }
    }

    /// Connect to `config.host:config.port` and start replicating.
    pub async fn start(self) -> Result<ReplicatorHandle> {
        let tcp = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        tcp.set_nodelay(true)?;
        self.start_on_stream(tcp).await
    }

    /// Start replicating over an already-connected stream.
    ///
    /// Metadata rules are validated before the handshake; every bootstrap
    /// failure is returned from here rather than through the handle.
    pub async fn start_on_stream<S>(self, stream: S) -> Result<ReplicatorHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let store =
            ReplicationMetadataStore::load(Arc::clone(&self.catalog), self.config.rules.clone())
                .await?;

        let mut conn =
            SourceConnection::handshake(stream, &self.config.user, &self.config.password).await?;
        let checksum = conn.negotiate_checksum().await?;
        conn.request_heartbeat(self.config.heartbeat_interval)
            .await?;

        let persisted = self.checkpoints.load().await?.map(LogPosition::from);
        let start = match (persisted, &self.config.start_position) {
            (Some(p), _) => p,
            (None, Some(p)) => p.clone(),
            (None, None) => conn.master_status().await?,
        };

        conn.register_replica(self.config.server_id).await?;
        let transport = conn.start_dump(self.config.server_id, &start).await?;
        Ok(self.spawn_pipeline(transport, checksum, store, start))
    }

    fn spawn_pipeline<S>(
        self,
        transport: PacketTransport<S>,
        checksum: ChecksumAlgorithm,
        store: ReplicationMetadataStore,
        start: LogPosition,
    ) -> ReplicatorHandle
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let frequencies = store.frequencies();
        let (commands, commands_rx) = mpsc::channel(frequencies.len() + 4);
        let notifier = FailureNotifier::new(&commands);

        let mut queues = Vec::with_capacity(frequencies.len());
        let mut permits = Vec::with_capacity(frequencies.len());
        let mut buffers = Vec::with_capacity(frequencies.len());
        for id in 0..frequencies.len() {
            let (events_tx, events_rx) = mpsc::channel(self.config.buffer_events.max(1));
            let (permit_tx, permit_rx) = mpsc::channel(1);
            let (buffer_stage, signals) = stage("buffer");
            let worker = BufferWorker::new(
                id,
                events_rx,
                permit_rx,
                Arc::clone(&self.destination),
                notifier.clone(),
            );
            tokio::spawn(worker.run(signals));
            queues.push(events_tx);
            permits.push(permit_tx.clone());
            buffers.push(BufferStage {
                stage: buffer_stage,
                permits: permit_tx,
            });
        }

        let (scheduler_stage, signals) = stage("scheduler");
        tokio::spawn(run_scheduler(
            ControlScheduler::new(&frequencies),
            permits,
            self.config.tick_interval,
            signals,
            notifier.clone(),
        ));

        let (metadata, responder) = store.into_channel(1);
        let (metadata_stage, signals) = stage("metadata");
        tokio::spawn(responder.run(signals));

        let reader = EventLogReader::new(
            transport,
            checksum,
            start.clone(),
            metadata,
            Distributor::new(queues),
        )
        .with_relay_begin(self.config.relay_begin)
        .with_idle_timeout(self.config.idle_timeout);
        let (reader_stage, signals) = stage("reader");
        tokio::spawn(reader.run(signals, notifier));

        let coordinator = ShutdownCoordinator::new(
            commands_rx,
            reader_stage,
            metadata_stage,
            scheduler_stage,
            buffers,
            self.checkpoints,
            Some(start.clone()),
        );
        let join = tokio::spawn(coordinator.run());

        info!(
            position = %start,
            buffers = frequencies.len(),
            "replication started"
        );
        ReplicatorHandle {
            commands,
            join,
            start,
        }
    }
}
