use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::db::{dedup_by_key, ProductStore, StoreError};
use crate::models::product::{Nutrient, ProductAttributes, ProductRecord, StorageId};
use crate::models::run::RunStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProduct {
    sku: String,
    attributes: ProductAttributes,
    fetched_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NutrientRow {
    product_id: StorageId,
    sku: String,
    position: usize,
    #[serde(flatten)]
    nutrient: Nutrient,
}

/// On-disk layout: three tables and the id sequence.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    next_id: StorageId,
    #[serde(default)]
    products: BTreeMap<StorageId, StoredProduct>,
    #[serde(default)]
    nutrients: Vec<NutrientRow>,
    #[serde(default)]
    run_stats: Vec<RunStats>,
}

struct Inner {
    doc: Document,
    by_sku: HashMap<String, StorageId>,
}

impl Inner {
    fn insert(&mut self, record: &ProductRecord) -> StorageId {
        self.doc.next_id += 1;
        let id = self.doc.next_id;
        self.doc.products.insert(id, stored(record));
        self.by_sku.insert(record.key.clone(), id);
        self.replace_nutrients(id, record);
        id
    }

    fn update(&mut self, id: StorageId, record: &ProductRecord) {
        self.doc.products.insert(id, stored(record));
        self.replace_nutrients(id, record);
    }

    fn replace_nutrients(&mut self, id: StorageId, record: &ProductRecord) {
        self.doc.nutrients.retain(|row| row.product_id != id);
        self.doc
            .nutrients
            .extend(record.nutrients.iter().enumerate().map(|(position, n)| NutrientRow {
                product_id: id,
                sku: record.key.clone(),
                position,
                nutrient: n.clone(),
            }));
    }
}

fn stored(record: &ProductRecord) -> StoredProduct {
    StoredProduct {
        sku: record.key.clone(),
        attributes: record.attributes.clone(),
        fetched_at: record.fetched_at,
        updated_at: Utc::now(),
    }
}

/// Product store kept in a single JSON document on disk.
///
/// The whole document is held in memory and rewritten (temp file, then
/// rename) after every mutation, so a crash leaves either the old or the new
/// version on disk.
pub struct JsonDocumentStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonDocumentStore {
    /// Open the document at `path`, creating an empty one if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice::<Document>(&bytes)?,
            Ok(_) => Document::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };

        let by_sku = doc
            .products
            .iter()
            .map(|(id, p)| (p.sku.clone(), *id))
            .collect();

        tracing::info!(path = %path.display(), products = doc.products.len(), "Document store opened");

        Ok(Self {
            path,
            inner: Mutex::new(Inner { doc, by_sku }),
        })
    }

    async fn persist(&self, doc: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn record_from(&self, inner: &Inner, id: StorageId) -> Option<ProductRecord> {
        let product = inner.doc.products.get(&id)?;
        let mut rows: Vec<&NutrientRow> = inner
            .doc
            .nutrients
            .iter()
            .filter(|row| row.product_id == id)
            .collect();
        rows.sort_by_key(|row| row.position);

        Some(ProductRecord {
            key: product.sku.clone(),
            attributes: product.attributes.clone(),
            nutrients: rows.into_iter().map(|row| row.nutrient.clone()).collect(),
            fetched_at: product.fetched_at,
        })
    }
}

#[async_trait]
impl ProductStore for JsonDocumentStore {
    async fn upsert_one(&self, record: &ProductRecord) -> Result<StorageId, StoreError> {
        if record.key.is_empty() {
            return Err(StoreError::MissingKey);
        }

        let mut inner = self.inner.lock().await;
        let id = match inner.by_sku.get(&record.key).copied() {
            Some(id) => {
                inner.update(id, record);
                tracing::debug!(sku = %record.key, id, "Updated product");
                id
            }
            None => {
                let id = inner.insert(record);
                tracing::debug!(sku = %record.key, id, "Inserted product");
                id
            }
        };

        self.persist(&inner.doc).await?;
        Ok(id)
    }

    async fn upsert_many(&self, records: &[ProductRecord]) -> Result<Vec<StorageId>, StoreError> {
        let records = dedup_by_key(records);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.lock().await;

        let (to_update, to_insert): (Vec<&ProductRecord>, Vec<&ProductRecord>) = records
            .iter()
            .copied()
            .partition(|r| inner.by_sku.contains_key(&r.key));

        let mut ids: HashMap<&str, StorageId> = HashMap::with_capacity(records.len());
        for record in &to_insert {
            ids.insert(record.key.as_str(), inner.insert(record));
        }
        for record in &to_update {
            let id = inner.by_sku[&record.key];
            inner.update(id, record);
            ids.insert(record.key.as_str(), id);
        }

        self.persist(&inner.doc).await?;

        tracing::info!(
            inserted = to_insert.len(),
            updated = to_update.len(),
            "Saved products to document store"
        );

        Ok(records.iter().map(|r| ids[r.key.as_str()]).collect())
    }

    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.by_sku.keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<ProductRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_sku
            .get(key)
            .and_then(|id| self.record_from(&inner, *id)))
    }

    async fn product_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.doc.products.len())
    }

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.doc.run_stats.push(stats.clone());
        self.persist(&inner.doc).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let inner = self.inner.lock().await;
        self.persist(&inner.doc).await?;
        tracing::debug!(path = %self.path.display(), "Document store closed");
        Ok(())
    }
}
