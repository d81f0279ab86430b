#![cfg(feature = "examples")]

/// cargo run --example tail --features examples
///
/// MYSQL_RULES may point at a JSON file with the replication rules, e.g.
/// `{"schemas": ["shop"], "buffers": [{"number": 0, "frequency": 1},
/// {"number": 1, "frequency": 10, "tables": ["shop.audit"]}]}`.
use std::sync::Arc;

use mysqlwire_replication::{
    FileCheckpointStore, InformationSchemaCatalog, LogDestination, LogPosition, MetadataRules,
    ReplicationConfig, Replicator,
};

fn env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mysqlwire_replication=debug".into()),
        )
        .init();

    let rules = match std::env::var("MYSQL_RULES") {
        Ok(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        Err(_) => MetadataRules {
            schemas: vec![env("MYSQL_SCHEMA", "test")],
            ..MetadataRules::default()
        },
    };
    let start_position = match std::env::var("MYSQL_START") {
        Ok(s) => Some(LogPosition::parse(&s)?),
        Err(_) => None,
    };

    let config = ReplicationConfig {
        host: env("MYSQL_HOST", "127.0.0.1"),
        port: env("MYSQL_PORT", "3306").parse()?,
        user: env("MYSQL_USER", "root"),
        password: env("MYSQL_PASSWORD", ""),
        server_id: env("MYSQL_SERVER_ID", "1001").parse()?,
        start_position,
        rules,
        ..ReplicationConfig::default()
    };

    let catalog = Arc::new(InformationSchemaCatalog::connect(&config).await?);
    let checkpoints = Arc::new(FileCheckpointStore::new(env(
        "MYSQL_CHECKPOINT",
        "tail-checkpoint.json",
    )));
    let handle = Replicator::new(config, catalog, Arc::new(LogDestination), checkpoints)
        .start()
        .await?;
    println!("tailing from {}; ctrl-c to stop", handle.start_position());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => handle.shutdown().await,
        _ = async {
            while !handle.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        } => {}
    }

    let report = handle.join().await?;
    match report.checkpoint {
        Some(p) => println!("stopped at {p} ({:?})", report.trigger),
        None => println!("stopped without a checkpoint ({:?})", report.trigger),
    }
    if let Some(e) = report.first_error() {
        anyhow::bail!("replication failed: {e}");
    }
    Ok(())
}
