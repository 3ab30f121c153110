//! Key-value storage contract shared by the ingest pipeline and the cleaner.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Backend limit on items per batch write.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;
/// Backend limit on keys per batch existence lookup.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// A stored item: flat attribute map.
pub type Item = Map<String, Value>;

/// Name and key schema of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl TableSpec {
    /// Processed-report marker table, keyed by report id.
    pub fn markers(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: "id".to_string(),
            sort_key: None,
        }
    }

    /// Report row table, keyed by composite key and report creation time.
    pub fn report_rows(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: "composite_key".to_string(),
            sort_key: Some("createTime".to_string()),
        }
    }

    /// Extracts the primary key of `item` under this schema.
    pub fn key_of(&self, item: &Item) -> Result<ItemKey, StoreError> {
        let partition = key_attribute(&self.name, item, &self.partition_key)?;
        let sort = match &self.sort_key {
            Some(attr) => Some(key_attribute(&self.name, item, attr)?),
            None => None,
        };
        Ok(ItemKey { partition, sort })
    }
}

fn key_attribute(table: &str, item: &Item, attr: &str) -> Result<String, StoreError> {
    match item.get(attr) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::MissingKeyAttribute {
            table: table.to_string(),
            attribute: attr.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: Option<String>) -> Self {
        Self {
            partition: partition.into(),
            sort,
        }
    }
}

/// Result of a single batch write; unprocessed items were not written.
#[derive(Debug, Clone, Default)]
pub struct BatchPutOutcome {
    pub written: usize,
    pub unprocessed: Vec<Item>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {0} does not exist")]
    TableNotFound(String),
    #[error("item for table {table} is missing key attribute {attribute}")]
    MissingKeyAttribute { table: String, attribute: String },
    #[error("batch of {size} exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("no item in {table} with key {key:?}")]
    ItemNotFound { table: String, key: ItemKey },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the subset of partition keys that have at least one item.
    async fn batch_get_existing(
        &self,
        table: &TableSpec,
        keys: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Upserts up to [`MAX_BATCH_WRITE_ITEMS`] items.
    async fn batch_put(&self, table: &TableSpec, items: Vec<Item>)
        -> Result<BatchPutOutcome, StoreError>;

    /// Items whose partition key starts with one of `prefixes`; all items when empty.
    async fn scan(&self, table: &TableSpec, prefixes: &[String]) -> Result<Vec<Item>, StoreError>;

    async fn delete_item(&self, table: &TableSpec, key: &ItemKey) -> Result<(), StoreError>;
}
