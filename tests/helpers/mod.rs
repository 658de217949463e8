//! Test helpers: in-process fakes for the network seams and a pipeline
//! wired against a temporary data directory.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use plus_scraper::db::{JsonDocumentStore, ProductStore, StoreError};
use plus_scraper::models::identity::Identity;
use plus_scraper::models::product::{ProductRecord, StorageId};
use plus_scraper::models::run::RunStats;
use plus_scraper::models::work_item::WorkItem;
use plus_scraper::orchestrator::Pipeline;
use plus_scraper::services::backoff::{BackoffPolicy, RateLimiter};
use plus_scraper::services::dead_letter::DeadLetterQueue;
use plus_scraper::services::discovery::{DiscoveryError, IndexSource, WorkDiscovery};
use plus_scraper::services::fetcher::{FetchError, Fetcher, ProductSource};
use plus_scraper::services::identity::IdentityPool;
use plus_scraper::services::progress::ProgressTracker;

use crate::fixtures::product_payload;

/// Index source answering every request the same way
pub struct StaticIndex {
    body: Result<String, u16>,
    pub calls: AtomicUsize,
}

impl StaticIndex {
    pub fn ok(body: String) -> Arc<Self> {
        Arc::new(Self {
            body: Ok(body),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            body: Err(status),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl IndexSource for StaticIndex {
    async fn fetch_index(&self) -> Result<String, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.body {
            Ok(body) => Ok(body.clone()),
            Err(403) => Err(DiscoveryError::Denied(403)),
            Err(status) => Err(DiscoveryError::Status(*status)),
        }
    }
}

/// How the fake product API answers for one identifier
#[derive(Debug, Clone)]
pub enum Reply {
    Product,
    /// A product whose payload names a different SKU than was requested
    ProductWithSku(String),
    NoData,
    Status(u16),
}

/// Product API fake: products by default, scripted failures per identifier
#[derive(Default)]
pub struct FakeProductSource {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    interrupt: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl FakeProductSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reply(&self, sku: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(sku.to_string(), reply);
    }

    /// Request shutdown while answering the `nth` call (1-based).
    pub fn interrupt_on_call(&self, nth: usize, tx: watch::Sender<bool>) {
        *self.interrupt.lock().unwrap() = Some((nth, tx));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, sku: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == sku).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ProductSource for FakeProductSource {
    async fn fetch(&self, item: &WorkItem, _identity: Option<&Identity>) -> Result<Value, FetchError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(item.identifier.clone());
            calls.len()
        };

        if let Some((nth, tx)) = self.interrupt.lock().unwrap().as_ref() {
            if *nth == count {
                let _ = tx.send(true);
            }
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&item.identifier)
            .cloned()
            .unwrap_or(Reply::Product);

        match reply {
            Reply::Product => Ok(product_payload(
                &item.identifier,
                &format!("Product {}", item.identifier),
                "1.00",
            )),
            Reply::ProductWithSku(sku) => Ok(product_payload(&sku, &format!("Product {sku}"), "1.00")),
            Reply::NoData => Err(FetchError::MissingData(item.identifier.clone())),
            Reply::Status(status) => Err(FetchError::Status(status)),
        }
    }
}

/// Document store that counts write paths and can be told to fail writes
pub struct CountingStore {
    inner: JsonDocumentStore,
    pub upsert_one_calls: AtomicUsize,
    pub upsert_many_calls: AtomicUsize,
    pub fail_writes: AtomicBool,
}

impl CountingStore {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for CountingStore {
    async fn upsert_one(&self, record: &ProductRecord) -> Result<StorageId, StoreError> {
        self.upsert_one_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.inner.upsert_one(record).await
    }

    async fn upsert_many(&self, records: &[ProductRecord]) -> Result<Vec<StorageId>, StoreError> {
        self.upsert_many_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.inner.upsert_many(records).await
    }

    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError> {
        self.inner.existing_keys().await
    }

    async fn get(&self, key: &str) -> Result<Option<ProductRecord>, StoreError> {
        self.inner.get(key).await
    }

    async fn product_count(&self) -> Result<usize, StoreError> {
        self.inner.product_count().await
    }

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        self.inner.record_run(stats).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

/// A data directory plus the long-lived pieces a pipeline is built from
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<CountingStore>,
    pub tracker: ProgressTracker,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let inner = JsonDocumentStore::open(dir.path().join("db.json"))
            .await
            .expect("Failed to open document store");
        let tracker = ProgressTracker::new(dir.path());

        Self {
            dir,
            store: Arc::new(CountingStore {
                inner,
                upsert_one_calls: AtomicUsize::new(0),
                upsert_many_calls: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
            }),
            tracker,
        }
    }

    pub fn backoff() -> BackoffPolicy {
        BackoffPolicy::new(3, Duration::from_millis(1), 2.0).with_jitter(0.0)
    }

    pub fn discovery(&self, index: Arc<dyn IndexSource>) -> WorkDiscovery {
        WorkDiscovery::new(
            index,
            self.dir.path().join("product_urls.txt"),
            "https://www.plus.nl",
            Self::backoff(),
            self.tracker.clone(),
        )
    }

    pub fn fetcher(&self, source: Arc<dyn ProductSource>) -> Fetcher {
        Fetcher::new(
            source,
            IdentityPool::disabled(),
            RateLimiter::new(Duration::ZERO),
            Self::backoff(),
        )
    }

    pub fn dead_letter_path(&self) -> std::path::PathBuf {
        self.dir.path().join("retry.json")
    }

    pub async fn dead_letters(&self) -> DeadLetterQueue {
        DeadLetterQueue::load(self.dead_letter_path()).await
    }

    pub async fn pipeline(
        &self,
        index: Arc<dyn IndexSource>,
        source: Option<Arc<FakeProductSource>>,
        shutdown: watch::Receiver<bool>,
    ) -> Pipeline {
        let fetcher = source.map(|s| self.fetcher(s));
        Pipeline::new(
            self.store.clone(),
            self.discovery(index),
            fetcher,
            self.tracker.clone(),
            self.dead_letters().await,
            shutdown,
        )
    }
}

/// A shutdown receiver whose sender is already gone: never fires
pub fn no_shutdown() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
