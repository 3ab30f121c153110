//! In-process backend, used for dry runs and tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{
    BatchPutOutcome, Item, ItemKey, KeyValueStore, StoreError, TableSpec, MAX_BATCH_WRITE_ITEMS,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<ItemKey, Item>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full contents of a table in key order.
    pub async fn items(&self, table: &str) -> Vec<Item> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables.get(table).map(BTreeMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn batch_get_existing(
        &self,
        table: &TableSpec,
        keys: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.get(&table.name) else {
            return Ok(HashSet::new());
        };
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        Ok(rows
            .keys()
            .filter(|k| wanted.contains(k.partition.as_str()))
            .map(|k| k.partition.clone())
            .collect())
    }

    async fn batch_put(
        &self,
        table: &TableSpec,
        items: Vec<Item>,
    ) -> Result<BatchPutOutcome, StoreError> {
        if items.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::BatchTooLarge {
                size: items.len(),
                limit: MAX_BATCH_WRITE_ITEMS,
            });
        }
        let keyed = items
            .into_iter()
            .map(|item| table.key_of(&item).map(|key| (key, item)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.name.clone()).or_default();
        let written = keyed.len();
        for (key, item) in keyed {
            rows.insert(key, item);
        }
        Ok(BatchPutOutcome {
            written,
            unprocessed: Vec::new(),
        })
    }

    async fn scan(&self, table: &TableSpec, prefixes: &[String]) -> Result<Vec<Item>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.get(&table.name) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(k, _)| prefixes.is_empty() || prefixes.iter().any(|p| k.partition.starts_with(p)))
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn delete_item(&self, table: &TableSpec, key: &ItemKey) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let removed = tables.get_mut(&table.name).and_then(|rows| rows.remove(key));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::ItemNotFound {
                table: table.name.clone(),
                key: key.clone(),
            }),
        }
    }
}
