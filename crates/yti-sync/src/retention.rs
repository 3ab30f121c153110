//! Rolling-window cleanup of superseded report rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use yti_storage::{Item, ItemKey, KeyValueStore, StoreError, TableSpec};

pub const DEFAULT_RETENTION_MONTHS: u32 = 3;
pub const CLEANUP_COMPLETED_MESSAGE: &str = "Cleanup process completed successfully.";

#[derive(Debug, Error)]
#[error("deleting {key:?} from {table}: {source}")]
pub struct DeleteError {
    pub table: String,
    pub key: ItemKey,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub tables: usize,
    pub scanned: usize,
    pub groups: usize,
    pub deleted: usize,
    pub failed_deletes: usize,
    pub failed_tables: Vec<String>,
}

impl CleanupSummary {
    /// False when any table could not be scanned.
    pub fn is_complete(&self) -> bool {
        self.failed_tables.is_empty()
    }

    pub fn message(&self) -> String {
        if self.is_complete() {
            CLEANUP_COMPLETED_MESSAGE.to_string()
        } else {
            format!("Cleanup failed for tables: {}", self.failed_tables.join(", "))
        }
    }
}

/// `YYYY-MM` for the month of `today` and the `months - 1` months before it.
pub fn month_prefixes(today: NaiveDate, months: u32) -> Vec<String> {
    let Some(first_of_month) = today.with_day(1) else {
        return Vec::new();
    };
    (0..months.max(1))
        .filter_map(|back| first_of_month.checked_sub_months(Months::new(back)))
        .map(|month| month.format("%Y-%m").to_string())
        .collect()
}

#[derive(Clone)]
pub struct RetentionCleaner {
    store: Arc<dyn KeyValueStore>,
}

impl RetentionCleaner {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn clean(&self, tables: &[String], retention_months: u32) -> CleanupSummary {
        self.clean_at(tables, retention_months, Utc::now().date_naive())
            .await
    }

    pub async fn clean_at(
        &self,
        tables: &[String],
        retention_months: u32,
        today: NaiveDate,
    ) -> CleanupSummary {
        let prefixes = month_prefixes(today, retention_months);
        let mut summary = CleanupSummary {
            tables: tables.len(),
            ..Default::default()
        };

        for name in tables {
            let span = info_span!("retention_table", table = %name);
            let ok = self
                .clean_table(&TableSpec::report_rows(name.as_str()), &prefixes, &mut summary)
                .instrument(span)
                .await;
            if !ok {
                summary.failed_tables.push(name.clone());
            }
        }

        info!(
            tables = summary.tables,
            scanned = summary.scanned,
            deleted = summary.deleted,
            failed_deletes = summary.failed_deletes,
            failed_tables = summary.failed_tables.len(),
            "cleanup finished"
        );
        summary
    }

    async fn clean_table(
        &self,
        table: &TableSpec,
        prefixes: &[String],
        summary: &mut CleanupSummary,
    ) -> bool {
        let items = match self.store.scan(table, prefixes).await {
            Ok(items) => items,
            Err(err) => {
                error!(error = %err, "scan failed, skipping table");
                return false;
            }
        };
        summary.scanned += items.len();

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for item in &items {
            match table.key_of(item) {
                Ok(ItemKey {
                    partition,
                    sort: Some(sort),
                }) => groups.entry(partition).or_default().push(sort),
                _ => warn!(item = %describe(item), "item without row key, skipped"),
            }
        }
        summary.groups += groups.len();

        for (composite_key, mut create_times) in groups {
            create_times.sort_unstable_by(|a, b| b.cmp(a));
            for stale in create_times.into_iter().skip(1) {
                let key = ItemKey::new(composite_key.clone(), Some(stale));
                match self.store.delete_item(table, &key).await {
                    Ok(()) => summary.deleted += 1,
                    Err(source) => {
                        let err = DeleteError {
                            table: table.name.clone(),
                            key,
                            source,
                        };
                        warn!(error = %err, "delete failed");
                        summary.failed_deletes += 1;
                    }
                }
            }
        }
        true
    }
}

fn describe(item: &Item) -> String {
    serde_json::Value::Object(item.clone()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use yti_storage::{BatchPutOutcome, MemoryStore};

    fn row(key: &str, create_time: &str) -> Item {
        match json!({"composite_key": key, "createTime": create_time, "views": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    async fn seeded(rows: Vec<Item>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let table = TableSpec::report_rows("rows");
        for batch in rows.chunks(25) {
            store.batch_put(&table, batch.to_vec()).await.unwrap();
        }
        store
    }

    #[test]
    fn prefixes_walk_back_across_year_boundaries() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(month_prefixes(jan, 3), ["2024-01", "2023-12", "2023-11"]);
        assert_eq!(month_prefixes(jan, 0), ["2024-01"]);
    }

    #[tokio::test]
    async fn keeps_newest_row_per_key() {
        let store = seeded(vec![
            row("2024-03-01T00:00:00Z_v1", "2024-03-02T00:00:00Z"),
            row("2024-03-01T00:00:00Z_v1", "2024-03-04T00:00:00Z"),
            row("2024-03-01T00:00:00Z_v1", "2024-03-03T00:00:00Z"),
            row("2024-02-11T00:00:00Z_v2", "2024-02-12T00:00:00Z"),
        ])
        .await;

        let summary = RetentionCleaner::new(store.clone())
            .clean_at(&["rows".to_string()], 3, today())
            .await;

        let remaining = store.items("rows").await;
        assert_eq!(remaining.len(), 2);
        let v1: Vec<_> = remaining
            .iter()
            .filter(|i| i["composite_key"] == "2024-03-01T00:00:00Z_v1")
            .collect();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0]["createTime"], "2024-03-04T00:00:00Z");
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.message(), "Cleanup process completed successfully.");
    }

    #[tokio::test]
    async fn rows_outside_window_are_untouched() {
        let store = seeded(vec![
            row("2023-11-05T00:00:00Z_v1", "2023-11-06T00:00:00Z"),
            row("2023-11-05T00:00:00Z_v1", "2023-11-07T00:00:00Z"),
        ])
        .await;

        let summary = RetentionCleaner::new(store.clone())
            .clean_at(&["rows".to_string()], 3, today())
            .await;
        assert_eq!(store.len("rows").await, 2);
        assert_eq!(summary.scanned, 0);
    }

    struct BrokenDeletes(MemoryStore);

    #[async_trait]
    impl KeyValueStore for BrokenDeletes {
        async fn batch_get_existing(
            &self,
            table: &TableSpec,
            keys: &[String],
        ) -> Result<HashSet<String>, StoreError> {
            self.0.batch_get_existing(table, keys).await
        }

        async fn batch_put(
            &self,
            table: &TableSpec,
            items: Vec<Item>,
        ) -> Result<BatchPutOutcome, StoreError> {
            self.0.batch_put(table, items).await
        }

        async fn scan(&self, table: &TableSpec, prefixes: &[String]) -> Result<Vec<Item>, StoreError> {
            if table.name == "missing" {
                return Err(StoreError::TableNotFound(table.name.clone()));
            }
            self.0.scan(table, prefixes).await
        }

        async fn delete_item(&self, table: &TableSpec, key: &ItemKey) -> Result<(), StoreError> {
            Err(StoreError::ItemNotFound {
                table: table.name.clone(),
                key: key.clone(),
            })
        }
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let inner = MemoryStore::new();
        inner
            .batch_put(
                &TableSpec::report_rows("rows"),
                vec![
                    row("2024-03-01T00:00:00Z_v1", "2024-03-02T00:00:00Z"),
                    row("2024-03-01T00:00:00Z_v1", "2024-03-03T00:00:00Z"),
                ],
            )
            .await
            .unwrap();
        let cleaner = RetentionCleaner::new(Arc::new(BrokenDeletes(inner)));

        let summary = cleaner
            .clean_at(&["missing".to_string(), "rows".to_string()], 3, today())
            .await;
        assert_eq!(summary.failed_tables, ["missing"]);
        assert_eq!(summary.failed_deletes, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.scanned, 2);
        assert!(!summary.is_complete());
        assert_eq!(summary.message(), "Cleanup failed for tables: missing");
    }

    #[tokio::test]
    async fn failed_deletes_alone_still_complete() {
        let inner = MemoryStore::new();
        inner
            .batch_put(
                &TableSpec::report_rows("rows"),
                vec![
                    row("2024-03-01T00:00:00Z_v1", "2024-03-02T00:00:00Z"),
                    row("2024-03-01T00:00:00Z_v1", "2024-03-03T00:00:00Z"),
                ],
            )
            .await
            .unwrap();
        let summary = RetentionCleaner::new(Arc::new(BrokenDeletes(inner)))
            .clean_at(&["rows".to_string()], 3, today())
            .await;
        assert_eq!(summary.failed_deletes, 1);
        assert!(summary.is_complete());
        assert_eq!(summary.message(), CLEANUP_COMPLETED_MESSAGE);
    }
}
