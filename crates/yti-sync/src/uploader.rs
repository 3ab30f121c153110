//! Marker-based report dedup and batched row upserts.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use yti_core::{Record, ReportInstance};
use yti_storage::{
    BackoffPolicy, Item, KeyValueStore, StoreError, TableSpec, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_ITEMS,
};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("batch write to {table} failed: {source}")]
    Store {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("{count} items still unprocessed in {table} after {attempts} attempts")]
    Unprocessed {
        table: String,
        count: usize,
        attempts: usize,
    },
    #[error("serializing item for {table}: {source}")]
    Serialize {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone)]
pub struct DedupUploader {
    store: Arc<dyn KeyValueStore>,
    markers: TableSpec,
    backoff: BackoffPolicy,
}

impl DedupUploader {
    pub fn new(store: Arc<dyn KeyValueStore>, markers_table: impl Into<String>) -> Self {
        Self {
            store,
            markers: TableSpec::markers(markers_table),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn markers_table(&self) -> &str {
        &self.markers.name
    }

    /// Candidates without a marker, in listing order.
    pub async fn filter_new_reports(
        &self,
        job_id: &str,
        candidates: Vec<ReportInstance>,
    ) -> Result<Vec<ReportInstance>, StoreError> {
        let mut processed = HashSet::new();
        let ids: Vec<String> = candidates.iter().map(|r| r.id.clone()).collect();
        for chunk in ids.chunks(MAX_BATCH_GET_KEYS) {
            processed.extend(self.store.batch_get_existing(&self.markers, chunk).await?);
        }

        let fresh: Vec<_> = candidates
            .into_iter()
            .filter(|r| !processed.contains(&r.id))
            .collect();
        debug!(job_id, processed = processed.len(), new = fresh.len(), "filtered reports");
        Ok(fresh)
    }

    /// Upserts every record into `table_name`; returns the number written.
    pub async fn upload_records(
        &self,
        records: &[Record],
        table_name: &str,
    ) -> Result<usize, UploadError> {
        let table = TableSpec::report_rows(table_name);
        let items = records
            .iter()
            .map(|record| to_item(&table, record))
            .collect::<Result<Vec<_>, _>>()?;
        self.put_items(&table, items).await
    }

    /// Records that `instance` is fully ingested. Only call after its rows are uploaded.
    pub async fn mark_processed(&self, instance: &ReportInstance) -> Result<(), UploadError> {
        let item = to_item(&self.markers, instance)?;
        self.put_items(&self.markers, vec![item]).await?;
        Ok(())
    }

    async fn put_items(&self, table: &TableSpec, items: Vec<Item>) -> Result<usize, UploadError> {
        let mut written = 0usize;
        let mut remaining = items;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(MAX_BATCH_WRITE_ITEMS));
            written += self.put_batch(table, remaining).await?;
            remaining = rest;
        }
        Ok(written)
    }

    async fn put_batch(&self, table: &TableSpec, batch: Vec<Item>) -> Result<usize, UploadError> {
        let mut written = 0usize;
        let mut pending = batch;
        let mut attempt = 0usize;
        loop {
            let outcome = self
                .store
                .batch_put(table, pending)
                .await
                .map_err(|source| UploadError::Store {
                    table: table.name.clone(),
                    source,
                })?;
            written += outcome.written;
            pending = outcome.unprocessed;
            if pending.is_empty() {
                return Ok(written);
            }
            if attempt >= self.backoff.max_retries {
                return Err(UploadError::Unprocessed {
                    table: table.name.clone(),
                    count: pending.len(),
                    attempts: attempt + 1,
                });
            }
            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                table = %table.name,
                unprocessed = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "retrying unprocessed items"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn to_item<T: serde::Serialize>(table: &TableSpec, value: &T) -> Result<Item, UploadError> {
    let serialize_err = |source| UploadError::Serialize {
        table: table.name.clone(),
        source,
    };
    match serde_json::to_value(value).map_err(serialize_err)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serialize_err(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        )))),
    }
}
