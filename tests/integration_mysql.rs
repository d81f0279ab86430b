#![cfg(feature = "integration-tests")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mysqlwire_replication::binlog::ColumnValue;
use mysqlwire_replication::{
    BufferRule, ChangeEvent, FileCheckpointStore, InformationSchemaCatalog, LogPosition,
    MemoryDestination, MetadataRules, ReplicationConfig, Replicator, SourceConnection,
};
use testcontainers::ContainerRequest;
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt, core::IntoContainerPort, core::WaitFor};
use tokio::io::AsyncBufReadExt;
use tokio::task;
use tracing::{info, warn};

fn init_tracing() {
    // RUST_LOG=info,mysqlwire_replication=debug cargo test --features integration-tests ...
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn mysql_image(host_port: u16) -> ContainerRequest<GenericImage> {
    GenericImage::new("mysql", "8.0")
        // The entrypoint's temporary server listens on port 0; wait for the real one.
        .with_wait_for(WaitFor::message_on_stderr(
            "port: 3306  MySQL Community Server",
        ))
        .with_env_var("MYSQL_ROOT_PASSWORD", "secret")
        .with_cmd([
            "--server-id=1",
            "--log-bin=mysql-bin",
            "--binlog-format=ROW",
            "--binlog-row-image=FULL",
            "--binlog-checksum=CRC32",
            "--default-authentication-plugin=mysql_native_password",
        ])
        .with_mapped_port(host_port, 3306.tcp())
}

async fn follow_container_logs(container: &testcontainers::ContainerAsync<GenericImage>) {
    let mut err = container.stderr(true);
    task::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match err.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let l = line.trim_end();
                    if !l.is_empty() {
                        info!(target: "container:stderr", "{l}");
                    }
                }
                Err(e) => {
                    warn!(target: "container:stderr", "stderr follower error: {e}");
                    break;
                }
            }
        }
    });
}

fn config(port: u16) -> ReplicationConfig {
    ReplicationConfig {
        host: "127.0.0.1".into(),
        port,
        user: "root".into(),
        password: "secret".into(),
        server_id: 4242,
        start_position: None,
        heartbeat_interval: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(15),
        buffer_events: 1024,
        tick_interval: Duration::from_millis(1),
        relay_begin: false,
        rules: MetadataRules {
            schemas: vec!["shop".into()],
            excluded_columns: vec!["shop.items.secret".into()],
            delete_enabled: vec!["shop.items".into()],
            buffers: vec![
                BufferRule::new(0, 1),
                BufferRule::new(1, 10).with_tables(["shop.audit"]),
            ],
            ..MetadataRules::default()
        },
    }
}

async fn wait_for_mysql(config: &ReplicationConfig, timeout: Duration) -> Result<SourceConnection> {
    let start = Instant::now();
    loop {
        match SourceConnection::connect(config).await {
            Ok(c) => return Ok(c),
            Err(e) => {
                if start.elapsed() > timeout {
                    return Err(e).context("mysql did not become ready in time");
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

async fn setup_schema(conn: &mut SourceConnection) -> Result<()> {
    for sql in [
        "CREATE DATABASE IF NOT EXISTS shop",
        "CREATE TABLE shop.items (id INT PRIMARY KEY, name VARCHAR(40), \
         price DECIMAL(10,2), secret VARCHAR(20), status ENUM('new','sold'))",
        "CREATE TABLE shop.audit (id INT AUTO_INCREMENT PRIMARY KEY, note TEXT)",
    ] {
        conn.execute(sql).await.with_context(|| format!("run {sql}"))?;
    }
    Ok(())
}

async fn wait_for_events(
    destination: &MemoryDestination,
    timeout: Duration,
    done: impl Fn(&[ChangeEvent]) -> bool,
) -> Result<Vec<ChangeEvent>> {
    let deadline = Instant::now() + timeout;
    loop {
        let events = destination.events();
        if done(&events) {
            return Ok(events);
        }
        if Instant::now() > deadline {
            anyhow::bail!("timeout waiting for events; got {events:#?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn replicates_changes_and_resumes_from_checkpoint() -> Result<()> {
    init_tracing();

    let host_port = 33061;
    let container = mysql_image(host_port)
        .start()
        .await
        .context("start mysql container")?;
    follow_container_logs(&container).await;

    let config = config(host_port);
    let mut control = wait_for_mysql(&config, Duration::from_secs(60)).await?;
    setup_schema(&mut control).await?;

    let dir = tempfile::tempdir()?;
    let checkpoint_path = dir.path().join("checkpoint.json");

    let destination = Arc::new(MemoryDestination::new());
    let catalog = Arc::new(InformationSchemaCatalog::connect(&config).await?);
    let handle = Replicator::new(
        config.clone(),
        catalog,
        Arc::clone(&destination),
        Arc::new(FileCheckpointStore::new(&checkpoint_path)),
    )
    .start()
    .await
    .context("start replicator")?;
    info!(start = %handle.start_position(), "replication running");

    control
        .execute(
            "INSERT INTO shop.items VALUES (1, 'widget', 1234.56, 'hunter2', 'new'), \
             (2, 'gadget', 9.99, 'swordfish', 'new')",
        )
        .await?;
    control
        .execute("UPDATE shop.items SET status = 'sold' WHERE id = 1")
        .await?;
    control.execute("DELETE FROM shop.items WHERE id = 2").await?;
    control
        .execute("INSERT INTO shop.audit (note) VALUES ('sold widget')")
        .await?;

    let events = wait_for_events(&destination, Duration::from_secs(20), |events| {
        events
            .iter()
            .any(|e| e.rows().is_some_and(|r| r.table == "audit"))
            && events.iter().any(|e| matches!(e, ChangeEvent::Delete(_)))
    })
    .await?;

    let insert = events
        .iter()
        .find_map(|e| match e {
            ChangeEvent::Insert(rows) if rows.table == "items" => Some(rows),
            _ => None,
        })
        .context("items insert")?;
    assert_eq!(insert.row_count(), 2);
    assert_eq!(
        insert.after_value(0, "price"),
        Some(&ColumnValue::Decimal("1234.56".into()))
    );
    assert_eq!(insert.after_value(0, "secret"), Some(&ColumnValue::Null));

    let update = events
        .iter()
        .find_map(|e| match e {
            ChangeEvent::Update(rows) => Some(rows),
            _ => None,
        })
        .context("items update")?;
    assert_eq!(update.before_value(0, "status"), Some(&ColumnValue::Enum(1)));
    assert_eq!(update.after_value(0, "status"), Some(&ColumnValue::Enum(2)));

    let audit = events
        .iter()
        .find_map(|e| e.rows().filter(|r| r.table == "audit"))
        .context("audit insert")?;
    assert_eq!(audit.buffer, 1);

    handle.shutdown().await;
    let report = handle.join().await?;
    assert!(report.is_clean(), "{:?}", report.errors);
    let checkpoint = report.checkpoint.context("checkpoint")?;
    info!(%checkpoint, "stopped");

    // A second run picks up from the saved checkpoint and sees only new changes.
    let destination = Arc::new(MemoryDestination::new());
    let catalog = Arc::new(InformationSchemaCatalog::connect(&config).await?);
    let handle = Replicator::new(
        config.clone(),
        catalog,
        Arc::clone(&destination),
        Arc::new(FileCheckpointStore::new(&checkpoint_path)),
    )
    .start()
    .await?;
    assert_eq!(handle.start_position(), &checkpoint);

    control
        .execute("INSERT INTO shop.items VALUES (3, 'gizmo', 5.00, NULL, 'new')")
        .await?;
    let gizmo = ColumnValue::Integer { bits: 3, width: 4 };
    let events = wait_for_events(&destination, Duration::from_secs(20), |events| {
        events.iter().any(|e| {
            e.rows()
                .is_some_and(|r| r.table == "items" && r.after_value(0, "id") == Some(&gizmo))
        })
    })
    .await?;
    let ids: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChangeEvent::Insert(rows) if rows.table == "items" => {
                rows.after_value(0, "id").cloned()
            }
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![gizmo]);

    handle.shutdown().await;
    let report = handle.join().await?;
    assert!(report.is_clean(), "{:?}", report.errors);
    let resumed: Option<LogPosition> = report.checkpoint;
    assert!(
        resumed.as_ref().is_some_and(|p| p > &checkpoint),
        "checkpoint must advance: {checkpoint} -> {resumed:?}"
    );
    Ok(())
}
