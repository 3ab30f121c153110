//! Postgres backend storing every logical table in one JSONB table.

use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::store::{
    BatchPutOutcome, Item, ItemKey, KeyValueStore, StoreError, TableSpec, MAX_BATCH_WRITE_ITEMS,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running kv_items migrations")
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn batch_get_existing(
        &self,
        table: &TableSpec,
        keys: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pk
              FROM kv_items
             WHERE table_name = $1
               AND pk = ANY($2)
            "#,
        )
        .bind(&table.name)
        .bind(keys.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("pk")?);
        }
        Ok(out)
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

        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for item in items {
            let key = table.key_of(&item)?;
            sqlx::query(
                r#"
                INSERT INTO kv_items (table_name, pk, sk, item)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (table_name, pk, sk)
                DO UPDATE SET item = EXCLUDED.item, updated_at = now()
                "#,
            )
            .bind(&table.name)
            .bind(&key.partition)
            .bind(key.sort.unwrap_or_default())
            .bind(Json(Value::Object(item)))
            .execute(&mut *tx)
            .await?;
            written += 1;
        }
        tx.commit().await?;

        Ok(BatchPutOutcome {
            written,
            unprocessed: Vec::new(),
        })
    }

    async fn scan(&self, table: &TableSpec, prefixes: &[String]) -> Result<Vec<Item>, StoreError> {
        let rows = if prefixes.is_empty() {
            sqlx::query("SELECT item FROM kv_items WHERE table_name = $1 ORDER BY pk, sk")
                .bind(&table.name)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(
                r#"
                SELECT item
                  FROM kv_items
                 WHERE table_name = $1
                   AND EXISTS (
                       SELECT 1 FROM unnest($2::text[]) AS p(prefix)
                        WHERE starts_with(pk, p.prefix)
                   )
                 ORDER BY pk, sk
                "#,
            )
            .bind(&table.name)
            .bind(prefixes.to_vec())
            .fetch_all(&self.pool)
            .await?
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(value) = row.try_get::<Json<Value>, _>("item")?;
            if let Value::Object(item) = value {
                out.push(item);
            }
        }
        Ok(out)
    }

    async fn delete_item(&self, table: &TableSpec, key: &ItemKey) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM kv_items WHERE table_name = $1 AND pk = $2 AND sk = $3")
            .bind(&table.name)
            .bind(&key.partition)
            .bind(key.sort.clone().unwrap_or_default())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ItemNotFound {
                table: table.name.clone(),
                key: key.clone(),
            });
        }
        Ok(())
    }
}
