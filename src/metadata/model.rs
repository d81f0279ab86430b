use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::{BufferRule, MetadataRules};
use crate::error::{ReplicationError, Result};
use crate::metadata::catalog::{CatalogColumn, CatalogTable};

/// The default buffer. Everything without an explicit assignment lands here.
pub const DEFAULT_BUFFER: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    /// Enum labels in declaration order; empty for non-enum columns.
    pub enum_symbols: Vec<String>,
    /// Replicated as NULL.
    pub excluded_from_replication: bool,
    pub is_primary_key: bool,
}

impl Column {
    /// Label for a binlog enum ordinal. Ordinals are 1-based; 0 is the
    /// empty "invalid value" marker MySQL stores for bad inserts.
    pub fn enum_symbol(&self, ordinal: u16) -> Option<&str> {
        let idx = usize::from(ordinal).checked_sub(1)?;
        self.enum_symbols.get(idx).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub excluded_from_replication: bool,
    pub delete_enabled: bool,
    pub buffer_id: usize,
    pub frequency: u32,
    pub columns: Arc<[Column]>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub buffer_id: usize,
    pub frequency: u32,
    pub tables: BTreeMap<String, Table>,
}

/// Immutable snapshot of what replicates and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationMetadata {
    schemas: BTreeMap<String, Schema>,
    frequencies: Vec<u32>,
}

/// Buffer layout after validation: frequency per buffer plus the pins.
#[derive(Debug)]
struct BufferLayout {
    frequencies: Vec<u32>,
    schemas: HashMap<String, usize>,
    tables: HashMap<(String, String), usize>,
}

fn split_table(entry: &str) -> Result<(String, String)> {
    match entry.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
            Ok((schema.to_string(), table.to_string()))
        }
        _ => Err(ReplicationError::Config(format!(
            "malformed table reference '{entry}', expected schema.table"
        ))),
    }
}

fn split_column(entry: &str) -> Result<(String, String, String)> {
    let mut parts = entry.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(s), Some(t), Some(c)) if !s.is_empty() && !t.is_empty() && !c.is_empty() => {
            Ok((s.to_string(), t.to_string(), c.to_string()))
        }
        _ => Err(ReplicationError::Config(format!(
            "malformed column reference '{entry}', expected schema.table.column"
        ))),
    }
}

fn table_set(entries: &[String]) -> Result<HashSet<(String, String)>> {
    entries.iter().map(|e| split_table(e)).collect()
}

fn validate_buffers(rules: &MetadataRules) -> Result<BufferLayout> {
    let default_only = [BufferRule::new(DEFAULT_BUFFER, 1)];
    let mut buffers: Vec<&BufferRule> = if rules.buffers.is_empty() {
        default_only.iter().collect()
    } else {
        rules.buffers.iter().collect()
    };
    buffers.sort_by_key(|b| b.number);

    if buffers.iter().enumerate().any(|(i, b)| b.number != i) {
        let numbers: Vec<usize> = buffers.iter().map(|b| b.number).collect();
        return Err(ReplicationError::Config(format!(
            "buffer numbers must start from 0 without gaps or duplicates, got {numbers:?}"
        )));
    }

    let mut layout = BufferLayout {
        frequencies: Vec::with_capacity(buffers.len()),
        schemas: HashMap::new(),
        tables: HashMap::new(),
    };

    for b in buffers {
        if b.number == DEFAULT_BUFFER && b.frequency != 1 {
            return Err(ReplicationError::Config(format!(
                "default buffer 0 must have frequency 1, got {}",
                b.frequency
            )));
        }
        if b.frequency == 0 {
            return Err(ReplicationError::Config(format!(
                "buffer {} has frequency 0",
                b.number
            )));
        }
        if b.number == DEFAULT_BUFFER && (!b.schemas.is_empty() || !b.tables.is_empty()) {
            return Err(ReplicationError::Config(
                "schemas and tables cannot be pinned to the default buffer 0".into(),
            ));
        }
        layout.frequencies.push(b.frequency);

        for schema in &b.schemas {
            if !rules.schemas.contains(schema) {
                return Err(ReplicationError::Config(format!(
                    "buffer {} pins schema '{schema}' which is not replicated",
                    b.number
                )));
            }
            if let Some(other) = layout.schemas.insert(schema.clone(), b.number) {
                return Err(ReplicationError::Config(format!(
                    "schema '{schema}' pinned to both buffer {other} and buffer {}",
                    b.number
                )));
            }
        }
        for entry in &b.tables {
            let key = split_table(entry)?;
            if !rules.schemas.contains(&key.0) {
                return Err(ReplicationError::Config(format!(
                    "buffer {} pins table '{entry}' whose schema is not replicated",
                    b.number
                )));
            }
            if let Some(other) = layout.tables.insert(key, b.number) {
                return Err(ReplicationError::Config(format!(
                    "table '{entry}' pinned to both buffer {other} and buffer {}",
                    b.number
                )));
            }
        }
    }
    Ok(layout)
}

/// Labels from a column type such as `enum('a','it''s')`.
pub(crate) fn parse_enum_symbols(column_type: &str) -> Vec<String> {
    let trimmed = column_type.trim();
    let inner = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("enum(") && trimmed.ends_with(')') => {
            &trimmed[5..trimmed.len() - 1]
        }
        _ => return Vec::new(),
    };

    let mut symbols = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut symbol = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    symbol.push('\'');
                }
                '\'' => break,
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        symbol.push(escaped);
                    }
                }
                other => symbol.push(other),
            }
        }
        symbols.push(symbol);
    }
    symbols
}

fn build_column(
    col: &CatalogColumn,
    schema: &str,
    table: &str,
    excluded: &HashSet<(String, String, String)>,
) -> Column {
    let enum_symbols = if col.data_type.eq_ignore_ascii_case("enum") {
        parse_enum_symbols(&col.column_type)
    } else {
        Vec::new()
    };
    Column {
        name: col.name.clone(),
        data_type: col.data_type.clone(),
        enum_symbols,
        excluded_from_replication: excluded.contains(&(
            schema.to_string(),
            table.to_string(),
            col.name.clone(),
        )),
        is_primary_key: col.is_primary_key,
    }
}

impl ReplicationMetadata {
    /// Apply `rules` to the catalog's tables.
    ///
    /// Tables of schemas not listed in `rules.schemas` are dropped. A table's
    /// buffer is its own pin if it has one, else its schema's, else buffer 0.
    pub fn build(catalog: Vec<CatalogTable>, rules: &MetadataRules) -> Result<Self> {
        let layout = validate_buffers(rules)?;
        let excluded_tables = table_set(&rules.excluded_tables)?;
        let delete_enabled = table_set(&rules.delete_enabled)?;
        let excluded_columns: HashSet<(String, String, String)> = rules
            .excluded_columns
            .iter()
            .map(|e| split_column(e))
            .collect::<Result<_>>()?;

        let mut schemas: BTreeMap<String, Schema> = rules
            .schemas
            .iter()
            .map(|name| {
                let buffer_id = layout
                    .schemas
                    .get(name)
                    .copied()
                    .unwrap_or(DEFAULT_BUFFER);
                let schema = Schema {
                    name: name.clone(),
                    buffer_id,
                    frequency: layout.frequencies[buffer_id],
                    tables: BTreeMap::new(),
                };
                (name.clone(), schema)
            })
            .collect();

        for t in catalog {
            let Some(schema) = schemas.get_mut(&t.schema) else {
                continue;
            };
            let key = (t.schema.clone(), t.name.clone());
            let buffer_id = layout
                .tables
                .get(&key)
                .copied()
                .unwrap_or(schema.buffer_id);
            let columns: Arc<[Column]> = t
                .columns
                .iter()
                .map(|c| build_column(c, &t.schema, &t.name, &excluded_columns))
                .collect();
            let table = Table {
                schema: t.schema.clone(),
                name: t.name.clone(),
                excluded_from_replication: excluded_tables.contains(&key),
                delete_enabled: delete_enabled.contains(&key),
                buffer_id,
                frequency: layout.frequencies[buffer_id],
                columns,
            };
            schema.tables.insert(t.name, table);
        }

        Ok(Self {
            schemas,
            frequencies: layout.frequencies,
        })
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn lookup(&self, schema: &str, table: &str) -> Option<&Table> {
        self.schemas.get(schema)?.tables.get(table)
    }

    /// Frequency per buffer, indexed by buffer number.
    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    pub fn buffer_count(&self) -> usize {
        self.frequencies.len()
    }
}
