use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::data::{PriceObservation, Product};
use crate::identity::ProductId;

/// Storage abstraction for observations and products. The comparison core
/// never talks to this directly; callers fetch history and hand it over.
#[async_trait::async_trait]
pub trait PriceStore: Send + Sync + 'static {
    async fn observations_for(&self, product: ProductId) -> Result<Vec<PriceObservation>>;

    async fn all_observations(&self) -> Result<Vec<PriceObservation>>;

    async fn observation(&self, id: &str) -> Result<Option<PriceObservation>>;

    /// Insert or replace by observation id.
    async fn save_observation(&self, observation: &PriceObservation) -> Result<()>;

    async fn delete_observation(&self, id: &str) -> Result<bool>;

    async fn delete_observations(&self, ids: &[String]) -> Result<usize>;

    async fn product(&self, product: ProductId) -> Result<Option<Product>>;

    async fn save_product(&self, product: &Product) -> Result<()>;

    async fn count(&self) -> Result<usize> {
        Ok(self.all_observations().await?.len())
    }
}

/// Whole-store document, also the on-disk layout of `JsonFileStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub observations: Vec<PriceObservation>,
}

impl Snapshot {
    fn upsert_observation(&mut self, observation: &PriceObservation) {
        match self.observations.iter_mut().find(|o| o.id == observation.id) {
            Some(existing) => *existing = observation.clone(),
            None => self.observations.push(observation.clone()),
        }
    }

    fn upsert_product(&mut self, product: &Product) {
        match self.products.iter_mut().find(|p| p.product_identity == product.product_identity) {
            Some(existing) => *existing = product.clone(),
            None => self.products.push(product.clone()),
        }
    }

    fn remove(&mut self, ids: &[String]) -> usize {
        let before = self.observations.len();
        self.observations.retain(|o| !ids.contains(&o.id));
        before - self.observations.len()
    }

    fn for_product(&self, product: ProductId) -> Vec<PriceObservation> {
        self.observations.iter().filter(|o| o.product_identity == product).cloned().collect()
    }
}

/// In-process store, used by tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self { inner: RwLock::new(snapshot) }
    }
}

#[async_trait::async_trait]
impl PriceStore for MemoryStore {
    async fn observations_for(&self, product: ProductId) -> Result<Vec<PriceObservation>> {
        Ok(self.inner.read().await.for_product(product))
    }

    async fn all_observations(&self) -> Result<Vec<PriceObservation>> {
        Ok(self.inner.read().await.observations.clone())
    }

    async fn observation(&self, id: &str) -> Result<Option<PriceObservation>> {
        Ok(self.inner.read().await.observations.iter().find(|o| o.id == id).cloned())
    }

    async fn save_observation(&self, observation: &PriceObservation) -> Result<()> {
        self.inner.write().await.upsert_observation(observation);
        Ok(())
    }

    async fn delete_observation(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().await.remove(&[id.to_string()]) > 0)
    }

    async fn delete_observations(&self, ids: &[String]) -> Result<usize> {
        Ok(self.inner.write().await.remove(ids))
    }

    async fn product(&self, product: ProductId) -> Result<Option<Product>> {
        Ok(self.inner.read().await.products.iter().find(|p| p.product_identity == product).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.inner.write().await.upsert_product(product);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.observations.len())
    }
}

/// Store persisted as a single JSON document, re-read on every call so that
/// edits made by another process are picked up.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Snapshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Snapshot::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid store document {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(snapshot).context("store serialize failed")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    async fn update<T>(&self, f: impl FnOnce(&mut Snapshot) -> T + Send) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load().await?;
        let out = f(&mut snapshot);
        self.persist(&snapshot).await?;
        Ok(out)
    }
}

#[async_trait::async_trait]
impl PriceStore for JsonFileStore {
    async fn observations_for(&self, product: ProductId) -> Result<Vec<PriceObservation>> {
        Ok(self.load().await?.for_product(product))
    }

    async fn all_observations(&self) -> Result<Vec<PriceObservation>> {
        Ok(self.load().await?.observations)
    }

    async fn observation(&self, id: &str) -> Result<Option<PriceObservation>> {
        Ok(self.load().await?.observations.into_iter().find(|o| o.id == id))
    }

    async fn save_observation(&self, observation: &PriceObservation) -> Result<()> {
        self.update(|s| s.upsert_observation(observation)).await
    }

    async fn delete_observation(&self, id: &str) -> Result<bool> {
        let ids = [id.to_string()];
        Ok(self.update(|s| s.remove(&ids)).await? > 0)
    }

    async fn delete_observations(&self, ids: &[String]) -> Result<usize> {
        self.update(|s| s.remove(ids)).await
    }

    async fn product(&self, product: ProductId) -> Result<Option<Product>> {
        Ok(self.load().await?.products.into_iter().find(|p| p.product_identity == product))
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.update(|s| s.upsert_product(product)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObservationDraft;

    fn observation(name: &str, price: f64) -> PriceObservation {
        let draft = ObservationDraft {
            product_name: name.to_string(),
            store_name: Some("Costco".to_string()),
            original_price: Some(price),
            ..Default::default()
        };
        PriceObservation::from_draft(&draft, "tester", 1)
    }

    #[tokio::test]
    async fn memory_store_upserts_and_deletes() {
        let store = MemoryStore::new();
        let mut a = observation("Milk", 10.0);
        let b = observation("Bread", 5.0);
        store.save_observation(&a).await.unwrap();
        store.save_observation(&b).await.unwrap();

        a.discount_note = "member price".to_string();
        store.save_observation(&a).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.observations_for(a.product_identity).await.unwrap()[0].discount_note, "member price");

        assert!(store.delete_observation(&a.id).await.unwrap());
        assert!(!store.delete_observation(&a.id).await.unwrap());
        assert_eq!(store.delete_observations(&[b.id.clone(), "missing".to_string()]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn json_store_missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("price-scout-missing-{:08x}.json", rand::random::<u32>()));
        let store = JsonFileStore::new(&path);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.product(ProductId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_persists_between_handles() {
        let path = std::env::temp_dir().join(format!("price-scout-store-{:08x}.json", rand::random::<u32>()));
        let obs = observation("Milk", 10.0);
        {
            let store = JsonFileStore::new(&path);
            store.save_observation(&obs).await.unwrap();
            store
                .save_product(&Product {
                    product_identity: obs.product_identity,
                    barcode: None,
                    product_name: "Milk".to_string(),
                    created_at: 1,
                })
                .await
                .unwrap();
        }
        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.observation(&obs.id).await.unwrap(), Some(obs.clone()));
        assert!(reopened.product(obs.product_identity).await.unwrap().is_some());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
