use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::{HashMap, HashSet};

use crate::db::{dedup_by_key, ProductStore, StoreError};
use crate::models::product::{Nutrient, ProductAttributes, ProductRecord, StorageId};
use crate::models::run::RunStats;

/// PostgreSQL-backed product store.
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, apply migrations and wrap the pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = super::init_pool(database_url).await?;
        super::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

/// Replace the nutrient rows of one product.
async fn replace_nutrients(
    tx: &mut Transaction<'_, Postgres>,
    product_id: StorageId,
    record: &ProductRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM nutrients WHERE product_id = $1")
        .bind(product_id)
        .execute(&mut **tx)
        .await?;

    if record.nutrients.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO nutrients (product_id, sku, position, name, value, unit, parent_code) ",
    );
    builder.push_values(record.nutrients.iter().enumerate(), |mut row, (position, nutrient)| {
        row.push_bind(product_id)
            .push_bind(record.key.clone())
            .push_bind(position as i32)
            .push_bind(nutrient.name.clone())
            .push_bind(nutrient.value.clone())
            .push_bind(nutrient.unit.clone())
            .push_bind(nutrient.parent_code.clone());
    });
    builder.build().execute(&mut **tx).await?;

    Ok(())
}

/// Overwrite the fields of an existing product row, keeping its id.
async fn update_product(
    tx: &mut Transaction<'_, Postgres>,
    product_id: StorageId,
    record: &ProductRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE products
        SET name = $1,
            brand = $2,
            price = $3,
            attributes = $4,
            fetched_at = $5,
            updated_at = NOW()
        WHERE id = $6
        "#,
    )
    .bind(&record.attributes.name)
    .bind(&record.attributes.brand)
    .bind(&record.attributes.price)
    .bind(Json(record.attributes.clone()))
    .bind(record.fetched_at)
    .bind(product_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn upsert_one(&self, record: &ProductRecord) -> Result<StorageId, StoreError> {
        if record.key.is_empty() {
            return Err(StoreError::MissingKey);
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO products (sku, name, brand, price, attributes, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sku) DO UPDATE
            SET name = EXCLUDED.name,
                brand = EXCLUDED.brand,
                price = EXCLUDED.price,
                attributes = EXCLUDED.attributes,
                fetched_at = EXCLUDED.fetched_at,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&record.key)
        .bind(&record.attributes.name)
        .bind(&record.attributes.brand)
        .bind(&record.attributes.price)
        .bind(Json(record.attributes.clone()))
        .bind(record.fetched_at)
        .fetch_one(&mut *tx)
        .await?;

        let id: StorageId = row.try_get("id")?;
        replace_nutrients(&mut tx, id, record).await?;
        tx.commit().await?;

        tracing::debug!(sku = %record.key, id, "Upserted product");
        Ok(id)
    }

    async fn upsert_many(&self, records: &[ProductRecord]) -> Result<Vec<StorageId>, StoreError> {
        let records = dedup_by_key(records);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
        let mut tx = self.pool.begin().await?;

        // Phase one: a single lookup splits the batch into new and existing keys.
        let existing: HashMap<String, StorageId> =
            sqlx::query("SELECT id, sku FROM products WHERE sku = ANY($1)")
                .bind(&keys)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|row| -> Result<(String, StorageId), sqlx::Error> {
                    Ok((row.try_get("sku")?, row.try_get("id")?))
                })
                .collect::<Result<_, sqlx::Error>>()?;

        let (to_update, to_insert): (Vec<&ProductRecord>, Vec<&ProductRecord>) =
            records.iter().copied().partition(|r| existing.contains_key(&r.key));

        // Phase two: bulk insert the new keys, update the rest one by one.
        let mut ids: HashMap<String, StorageId> = HashMap::with_capacity(records.len());

        if !to_insert.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO products (sku, name, brand, price, attributes, fetched_at) ",
            );
            builder.push_values(to_insert.iter(), |mut row, record| {
                row.push_bind(record.key.clone())
                    .push_bind(record.attributes.name.clone())
                    .push_bind(record.attributes.brand.clone())
                    .push_bind(record.attributes.price.clone())
                    .push_bind(Json(record.attributes.clone()))
                    .push_bind(record.fetched_at);
            });
            builder.push(" RETURNING id, sku");

            for row in builder.build().fetch_all(&mut *tx).await? {
                ids.insert(row.try_get("sku")?, row.try_get("id")?);
            }
        }

        for record in &to_update {
            let id = existing[&record.key];
            update_product(&mut tx, id, record).await?;
            ids.insert(record.key.clone(), id);
        }

        for record in &records {
            if let Some(&id) = ids.get(&record.key) {
                replace_nutrients(&mut tx, id, record).await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            inserted = to_insert.len(),
            updated = to_update.len(),
            "Saved products to database"
        );

        Ok(records.iter().filter_map(|r| ids.get(&r.key).copied()).collect())
    }

    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT sku FROM products")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("sku").map_err(StoreError::from))
            .collect()
    }

    async fn get(&self, key: &str) -> Result<Option<ProductRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, attributes, fetched_at
            FROM products
            WHERE sku = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: StorageId = row.try_get("id")?;
        let Json(attributes): Json<ProductAttributes> = row.try_get("attributes")?;
        let fetched_at: DateTime<Utc> = row.try_get("fetched_at")?;

        let nutrients = sqlx::query(
            r#"
            SELECT name, value, unit, parent_code
            FROM nutrients
            WHERE product_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| -> Result<Nutrient, sqlx::Error> {
            Ok(Nutrient {
                name: r.try_get("name")?,
                value: r.try_get("value")?,
                unit: r.try_get("unit")?,
                parent_code: r.try_get("parent_code")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(ProductRecord {
            key: row.try_get("sku")?,
            attributes,
            nutrients,
            fetched_at,
        }))
    }

    async fn product_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO run_stats (run_id, mode, total, processed, failed, skipped,
                                   final_position, interrupted, started_at, finished_at, elapsed_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(stats.run_id)
        .bind(&stats.mode)
        .bind(stats.total as i64)
        .bind(stats.processed as i64)
        .bind(stats.failed as i64)
        .bind(stats.skipped as i64)
        .bind(stats.final_position as i64)
        .bind(stats.interrupted)
        .bind(stats.started_at)
        .bind(stats.finished_at)
        .bind(stats.elapsed_secs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        tracing::debug!("Database connection closed");
        Ok(())
    }
}
