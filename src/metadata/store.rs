use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::MetadataRules;
use crate::error::{ReplicationError, Result};
use crate::metadata::catalog::MetadataCatalog;
use crate::metadata::model::{ReplicationMetadata, Table};
use crate::pipeline::StageSignals;

/// Owner of the metadata tree. Only this type ever replaces the tree; readers
/// hold `Arc` snapshots.
pub struct ReplicationMetadataStore {
    catalog: Arc<dyn MetadataCatalog>,
    rules: MetadataRules,
    current: Arc<ReplicationMetadata>,
}

impl ReplicationMetadataStore {
    /// Build the initial tree. Invalid rules fail here, before any connection
    /// to the binlog is made.
    pub async fn load(catalog: Arc<dyn MetadataCatalog>, rules: MetadataRules) -> Result<Self> {
        let tables = catalog.load(&rules.schemas).await?;
        let current = Arc::new(ReplicationMetadata::build(tables, &rules)?);
        info!(
            schemas = rules.schemas.len(),
            buffers = current.buffer_count(),
            "replication metadata loaded"
        );
        Ok(Self {
            catalog,
            rules,
            current,
        })
    }

    pub fn snapshot(&self) -> Arc<ReplicationMetadata> {
        Arc::clone(&self.current)
    }

    pub fn frequencies(&self) -> Vec<u32> {
        self.current.frequencies().to_vec()
    }

    pub fn lookup(&self, schema: &str, table: &str) -> Option<Table> {
        self.current.lookup(schema, table).cloned()
    }

    /// Reload the catalog and rebuild the tree. On error the previous tree
    /// stays in place.
    pub async fn refresh(&mut self, schema: &str, table: Option<&str>) -> Result<Option<Table>> {
        debug!(schema, table, "refreshing replication metadata");
        let tables = self.catalog.load(&self.rules.schemas).await?;
        self.current = Arc::new(ReplicationMetadata::build(tables, &self.rules)?);
        Ok(table.and_then(|t| self.lookup(schema, t)))
    }

    /// Split into the reader-side handle and the owner task.
    pub fn into_channel(self, capacity: usize) -> (MetadataHandle, MetadataResponder) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = MetadataHandle {
            snapshot: self.snapshot(),
            requests: tx,
        };
        let responder = MetadataResponder {
            store: self,
            requests: rx,
        };
        (handle, responder)
    }
}

#[derive(Debug)]
pub struct RefreshRequest {
    pub schema: String,
    pub table: Option<String>,
    pub reply: oneshot::Sender<Result<Arc<ReplicationMetadata>>>,
}

/// Reader-side view: the latest snapshot plus a way to ask for a refresh.
#[derive(Debug, Clone)]
pub struct MetadataHandle {
    snapshot: Arc<ReplicationMetadata>,
    requests: mpsc::Sender<RefreshRequest>,
}

impl MetadataHandle {
    pub fn snapshot(&self) -> &Arc<ReplicationMetadata> {
        &self.snapshot
    }

    /// Ask the owner task to reload, wait for the new snapshot and adopt it.
    pub async fn refresh(&mut self, schema: &str, table: Option<&str>) -> Result<Option<Table>> {
        let (reply, rx) = oneshot::channel();
        let request = RefreshRequest {
            schema: schema.to_string(),
            table: table.map(str::to_string),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| ReplicationError::Task("metadata responder is gone".into()))?;
        let snapshot = rx
            .await
            .map_err(|_| ReplicationError::Task("metadata responder dropped the reply".into()))??;
        self.snapshot = snapshot;
        Ok(table.and_then(|t| self.snapshot.lookup(schema, t).cloned()))
    }
}

/// The metadata owner task.
pub struct MetadataResponder {
    store: ReplicationMetadataStore,
    requests: mpsc::Receiver<RefreshRequest>,
}

impl MetadataResponder {
    pub async fn run(mut self, signals: StageSignals<Result<()>>) {
        let StageSignals { mut stop, ack } = signals;
        let mut served = 0u64;
        loop {
            if *stop.borrow() {
                break;
            }
            let request = tokio::select! {
                biased;
                _ = stop.changed() => break,
                r = self.requests.recv() => r,
            };
            let Some(request) = request else {
                debug!("all metadata handles dropped");
                break;
            };
            let result = self
                .store
                .refresh(&request.schema, request.table.as_deref())
                .await
                .map(|_| self.store.snapshot());
            if let Err(e) = &result {
                warn!(schema = %request.schema, error = %e, "metadata refresh failed");
            }
            served += 1;
            let _ = request.reply.send(result);
        }
        debug!(refreshes = served, "metadata responder stopped");
        let _ = ack.send(Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferRule;
    use crate::metadata::catalog::{CatalogColumn, CatalogTable, StaticCatalog};
    use crate::pipeline::stage;

    fn rules() -> MetadataRules {
        MetadataRules {
            schemas: vec!["shop".into()],
            buffers: vec![BufferRule::new(0, 1), BufferRule::new(1, 5)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn load_rejects_invalid_rules() {
        let catalog = Arc::new(StaticCatalog::default());
        let mut r = rules();
        r.buffers = vec![BufferRule::new(0, 1), BufferRule::new(2, 5)];
        let err = ReplicationMetadataStore::load(catalog, r)
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn refresh_through_responder_sees_new_table() {
        let catalog = Arc::new(StaticCatalog::new(vec![CatalogTable::new(
            "shop",
            "orders",
            vec![CatalogColumn::new("id", "int")],
        )]));
        let store = ReplicationMetadataStore::load(catalog.clone(), rules())
            .await
            .unwrap();
        assert_eq!(store.frequencies(), vec![1, 5]);
        assert!(store.lookup("shop", "items").is_none());

        let (mut handle, responder) = store.into_channel(4);
        let (stage, signals) = stage("metadata");
        let task = tokio::spawn(responder.run(signals));

        catalog.put_table(CatalogTable::new(
            "shop",
            "items",
            vec![CatalogColumn::new("sku", "varchar")],
        ));
        let items = handle.refresh("shop", Some("items")).await.unwrap().unwrap();
        assert_eq!(items.columns[0].name, "sku");
        assert!(handle.snapshot().lookup("shop", "items").is_some());

        stage.stop().await.unwrap().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn refresh_after_responder_stopped_is_task_error() {
        let catalog = Arc::new(StaticCatalog::default());
        let store = ReplicationMetadataStore::load(catalog, rules()).await.unwrap();
        let (mut handle, responder) = store.into_channel(1);
        let (stage, signals) = stage("metadata");
        let task = tokio::spawn(responder.run(signals));
        stage.stop().await.unwrap().unwrap();
        task.await.unwrap();

        let err = handle.refresh("shop", None).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Task(_)));
    }
}
