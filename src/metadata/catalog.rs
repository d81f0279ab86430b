use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::SourceConnection;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};

/// One column as the source's catalog describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// Bare type name, e.g. `enum` or `varchar`.
    pub data_type: String,
    /// Full column type, e.g. `enum('new','paid')` or `varchar(40)`.
    pub column_type: String,
    pub is_primary_key: bool,
}

impl CatalogColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            column_type: data_type.clone(),
            data_type,
            is_primary_key: false,
        }
    }

    pub fn with_column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = column_type.into();
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub schema: String,
    pub name: String,
    /// Columns in ordinal order, matching the row images in the binlog.
    pub columns: Vec<CatalogColumn>,
}

impl CatalogTable {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<CatalogColumn>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }
}

/// Source of table and column definitions.
///
/// `load` is called once at startup and again on every metadata refresh, with
/// the schemas under replication.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn load(&self, schemas: &[String]) -> Result<Vec<CatalogTable>>;

    async fn lookup(&self, schema: &str, table: &str) -> Result<Option<CatalogTable>> {
        let tables = self.load(&[schema.to_string()]).await?;
        Ok(tables.into_iter().find(|t| t.name == table))
    }
}

/// In-memory catalog. Tables can be replaced at runtime to mimic DDL.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    tables: Mutex<Vec<CatalogTable>>,
}

impl StaticCatalog {
    pub fn new(tables: Vec<CatalogTable>) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Insert `table`, replacing any table with the same schema and name.
    pub fn put_table(&self, table: CatalogTable) {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        match tables
            .iter_mut()
            .find(|t| t.schema == table.schema && t.name == table.name)
        {
            Some(existing) => *existing = table,
            None => tables.push(table),
        }
    }
}

#[async_trait]
impl MetadataCatalog for StaticCatalog {
    async fn load(&self, schemas: &[String]) -> Result<Vec<CatalogTable>> {
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tables
            .iter()
            .filter(|t| schemas.contains(&t.schema))
            .cloned()
            .collect())
    }
}

/// Catalog backed by `information_schema.COLUMNS` on a dedicated connection.
pub struct InformationSchemaCatalog<S = TcpStream> {
    conn: tokio::sync::Mutex<SourceConnection<S>>,
}

impl InformationSchemaCatalog<TcpStream> {
    pub async fn connect(config: &ReplicationConfig) -> Result<Self> {
        let conn = SourceConnection::connect(config).await?;
        Ok(Self::new(conn))
    }
}

impl<S> InformationSchemaCatalog<S> {
    pub fn new(conn: SourceConnection<S>) -> Self {
        Self {
            conn: tokio::sync::Mutex::new(conn),
        }
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

pub(crate) fn columns_query(schemas: &[String]) -> String {
    let list = schemas
        .iter()
        .map(|s| quote_literal(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, COLUMN_KEY \
         FROM information_schema.COLUMNS WHERE TABLE_SCHEMA IN ({list}) \
         ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION"
    )
}

#[async_trait]
impl<S> MetadataCatalog for InformationSchemaCatalog<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn load(&self, schemas: &[String]) -> Result<Vec<CatalogTable>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }
        let rs = self.conn.lock().await.query(&columns_query(schemas)).await?;

        let mut tables: Vec<CatalogTable> = Vec::new();
        for row in &rs.rows {
            let field = |i: usize, what: &str| {
                row.get(i).cloned().flatten().ok_or_else(|| {
                    ReplicationError::protocol(format!("NULL {what} in information_schema row"))
                })
            };
            let schema = field(0, "TABLE_SCHEMA")?;
            let table = field(1, "TABLE_NAME")?;
            let column = CatalogColumn {
                name: field(2, "COLUMN_NAME")?,
                data_type: field(3, "DATA_TYPE")?,
                column_type: field(4, "COLUMN_TYPE")?,
                is_primary_key: row.get(5).cloned().flatten().as_deref() == Some("PRI"),
            };
            match tables.last_mut() {
                Some(t) if t.schema == schema && t.name == table => t.columns.push(column),
                _ => tables.push(CatalogTable::new(schema, table, vec![column])),
            }
        }
        debug!(
            schemas = schemas.len(),
            tables = tables.len(),
            "loaded catalog from information_schema"
        );
        Ok(tables)
    }
}
