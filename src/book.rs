use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::anomaly::{AnomalyDetector, AnomalyReport, flag_for_review};
use crate::comparator::{ComparisonResult, compare, compare_unit_price};
use crate::config::Config;
use crate::data::{ObservationDraft, ObservationEdit, PriceObservation, Product, now_ms};
use crate::identity::{ProductId, compute_identity};
use crate::pricing::{PriceCheck, resolve_effective_price_checked};
use crate::store::PriceStore;

/// What recording an observation produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub observation: PriceObservation,
    pub comparison: ComparisonResult,
    pub anomaly: AnomalyReport,
}

/// Record count taken when a batch edit starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub count: usize,
    pub taken_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    Clean,
    /// Another session added or removed records; the user has to resolve it.
    Conflict { expected: usize, actual: usize },
}

#[derive(Clone)]
struct Pending {
    observation: PriceObservation,
    barcode: Option<String>,
}

/// Application layer over a `PriceStore`: fetches history, runs the
/// comparison core on it and writes the results back.
pub struct PriceBook<S: PriceStore> {
    store: S,
    detector: AnomalyDetector,
    queue: Mutex<Vec<Pending>>,
}

impl<S: PriceStore> PriceBook<S> {
    pub fn new(store: S, detector: AnomalyDetector) -> Self {
        Self { store, detector, queue: Mutex::new(Vec::new()) }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store, AnomalyDetector::new(config.deviation_threshold, config.min_confidence))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Save a new observation after comparing it against the stored history
    /// for its product.
    pub async fn record(&self, draft: &ObservationDraft, recorded_by: &str) -> Result<RecordOutcome> {
        if let PriceCheck::Invalid(reason) = resolve_effective_price_checked(draft.original_price, draft.special_price) {
            bail!("no valid price for {:?}: {reason}", draft.product_name);
        }
        let observation = PriceObservation::from_draft(draft, recorded_by, now_ms());
        self.save_new(observation, draft.barcode.clone()).await
    }

    async fn save_new(&self, mut observation: PriceObservation, barcode: Option<String>) -> Result<RecordOutcome> {
        validate(&observation)?;

        let history = self.store.observations_for(observation.product_identity).await?;
        let comparison = compare(&observation, &history);
        let anomaly = self.detector.detect_in(observation.total_price, &history);
        if flag_for_review(&mut observation, &anomaly, now_ms()) {
            warn!(
                id = %observation.id,
                price = observation.total_price,
                average = anomaly.average_price,
                reason = anomaly.reason.as_str(),
                "price flagged for review"
            );
            #[cfg(feature = "with-metrics")]
            metrics::counter!("price_scout.anomalies").increment(1);
        }

        if self.store.product(observation.product_identity).await?.is_none() {
            let product = Product {
                product_identity: observation.product_identity,
                barcode: barcode.filter(|b| !b.trim().is_empty()),
                product_name: observation.product_name.clone(),
                created_at: observation.timestamp,
            };
            self.store.save_product(&product).await?;
            debug!(product = %product.product_identity, "created product");
        }

        self.store.save_observation(&observation).await?;
        #[cfg(feature = "with-metrics")]
        if comparison.is_best {
            metrics::counter!("price_scout.best_price").increment(1);
        }
        info!(
            id = %observation.id,
            product = %observation.product_identity,
            store = %observation.store_name,
            price = observation.total_price,
            best = comparison.is_best,
            "recorded observation"
        );
        Ok(RecordOutcome { observation, comparison, anomaly })
    }

    /// Observations for a product, oldest first.
    pub async fn history(&self, product: ProductId) -> Result<Vec<PriceObservation>> {
        let mut history = self.store.observations_for(product).await?;
        history.sort_by_key(|o| o.timestamp);
        Ok(history)
    }

    /// The cheapest stored observation for a product, checked against the rest.
    pub async fn best_price(&self, product: ProductId) -> Result<Option<(PriceObservation, ComparisonResult)>> {
        let history = self.store.observations_for(product).await?;
        let Some(lowest) = history
            .iter()
            .filter(|o| o.total_price.is_finite())
            .fold(None::<&PriceObservation>, |best, o| match best {
                Some(b) if o.total_price >= b.total_price => Some(b),
                _ => Some(o),
            })
            .cloned()
        else {
            return Ok(None);
        };
        let others: Vec<PriceObservation> = history.into_iter().filter(|o| o.id != lowest.id).collect();
        let comparison = compare(&lowest, &others);
        Ok(Some((lowest, comparison)))
    }

    pub async fn edit(&self, id: &str, edit: &ObservationEdit) -> Result<PriceObservation> {
        let mut observation = self.store.observation(id).await?.ok_or_else(|| anyhow!("observation {id} not found"))?;
        observation.apply_edit(edit);
        validate(&observation)?;
        self.store.save_observation(&observation).await?;
        info!(%id, price = observation.total_price, "edited observation");
        Ok(observation)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete_observation(id).await?;
        if removed {
            info!(%id, "deleted observation");
        }
        Ok(removed)
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let removed = self.store.delete_observations(ids).await?;
        info!(requested = ids.len(), removed, "bulk delete");
        Ok(removed)
    }

    /// Hold an extracted observation for review without saving it.
    pub async fn enqueue(&self, draft: &ObservationDraft, recorded_by: &str) -> PriceObservation {
        let observation = PriceObservation::from_draft(draft, recorded_by, now_ms());
        let mut queue = self.queue.lock().await;
        queue.push(Pending { observation: observation.clone(), barcode: draft.barcode.clone() });
        debug!(id = %observation.id, queued = queue.len(), "queued observation for review");
        observation
    }

    pub async fn pending(&self) -> Vec<PriceObservation> {
        self.queue.lock().await.iter().map(|p| p.observation.clone()).collect()
    }

    /// Unit-price comparison of a queued observation against stored history
    /// and the other queued observations for the same product.
    pub async fn review(&self, pending_id: &str) -> Result<ComparisonResult> {
        let (candidate, queued) = {
            let queue = self.queue.lock().await;
            let candidate = queue
                .iter()
                .find(|p| p.observation.id == pending_id)
                .map(|p| p.observation.clone())
                .ok_or_else(|| anyhow!("no pending observation {pending_id}"))?;
            let queued: Vec<PriceObservation> = queue.iter().map(|p| p.observation.clone()).collect();
            (candidate, queued)
        };
        let history = self.store.observations_for(candidate.product_identity).await?;
        Ok(compare_unit_price(&candidate, &history, &queued))
    }

    /// Save a queued observation. It leaves the queue only once the store has
    /// accepted it, so a validation or storage failure can be retried.
    pub async fn commit(&self, pending_id: &str) -> Result<RecordOutcome> {
        let pending = {
            let queue = self.queue.lock().await;
            let pending = queue
                .iter()
                .find(|p| p.observation.id == pending_id)
                .cloned()
                .ok_or_else(|| anyhow!("no pending observation {pending_id}"))?;
            validate(&pending.observation)?;
            pending
        };
        let outcome = self.save_new(pending.observation, pending.barcode).await?;
        self.queue.lock().await.retain(|p| p.observation.id != pending_id);
        Ok(outcome)
    }

    /// Replace a queued observation's fields before it is committed. Unlike a
    /// stored record, a queued one is re-keyed from its barcode or amended
    /// name and store.
    pub async fn amend(&self, pending_id: &str, edit: &ObservationEdit) -> Result<PriceObservation> {
        let mut queue = self.queue.lock().await;
        let pending = queue
            .iter_mut()
            .find(|p| p.observation.id == pending_id)
            .ok_or_else(|| anyhow!("no pending observation {pending_id}"))?;
        pending.observation.apply_edit(edit);
        pending.observation.product_identity = compute_identity(
            pending.barcode.as_deref().map(str::trim),
            Some(pending.observation.product_name.as_str()),
            Some(pending.observation.store_name.as_str()),
        );
        Ok(pending.observation.clone())
    }

    pub async fn discard(&self, pending_id: &str) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|p| p.observation.id != pending_id);
        queue.len() != before
    }

    pub async fn begin_batch_edit(&self) -> Result<BatchSnapshot> {
        Ok(BatchSnapshot { count: self.store.count().await?, taken_at: now_ms() })
    }

    /// Compare the record count with the one seen when editing started.
    pub async fn finish_batch_edit(&self, snapshot: &BatchSnapshot) -> Result<Reconcile> {
        let actual = self.store.count().await?;
        if actual == snapshot.count {
            return Ok(Reconcile::Clean);
        }
        warn!(expected = snapshot.count, actual, "records changed during batch edit");
        Ok(Reconcile::Conflict { expected: snapshot.count, actual })
    }
}

fn validate(observation: &PriceObservation) -> Result<()> {
    if observation.store_name.trim().is_empty() {
        bail!("store name is required");
    }
    if !(observation.total_price.is_finite() && observation.total_price > 0.0) {
        bail!("no valid price for {:?}", observation.product_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::UnitKind;
    use crate::store::{JsonFileStore, MemoryStore};

    fn book() -> PriceBook<MemoryStore> {
        PriceBook::new(MemoryStore::new(), AnomalyDetector::default())
    }

    fn draft(store: &str, price: f64) -> ObservationDraft {
        ObservationDraft {
            barcode: Some("4710000000001".to_string()),
            product_name: "Soy Milk".to_string(),
            store_name: Some(store.to_string()),
            original_price: Some(price),
            quantity: Some(400.0),
            unit_kind: UnitKind::Milliliters,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_record_creates_product() {
        let book = book();
        let outcome = book.record(&draft("PX Mart", 35.0), "amy").await.unwrap();
        assert!(outcome.comparison.is_best);
        assert_eq!(outcome.comparison.message, "first record");
        let product = book.store().product(outcome.observation.product_identity).await.unwrap().unwrap();
        assert_eq!(product.barcode.as_deref(), Some("4710000000001"));
        assert_eq!(product.product_name, "Soy Milk");
    }

    #[tokio::test]
    async fn rejects_missing_store_and_price() {
        let book = book();
        let mut no_store = draft("", 35.0);
        no_store.store_name = None;
        let err = book.record(&no_store, "amy").await.unwrap_err();
        assert!(err.to_string().contains("store name is required"));

        let mut no_price = draft("PX Mart", 35.0);
        no_price.original_price = None;
        assert!(book.record(&no_price, "amy").await.is_err());
        assert_eq!(book.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn later_cheaper_record_is_best() {
        let book = book();
        book.record(&draft("PX Mart", 35.0), "amy").await.unwrap();
        let worse = book.record(&draft("Carrefour", 39.0), "amy").await.unwrap();
        assert!(!worse.comparison.is_best);
        assert_eq!(worse.comparison.reference_store.as_deref(), Some("PX Mart"));
        let better = book.record(&draft("Costco", 31.0), "amy").await.unwrap();
        assert!(better.comparison.is_best);

        let (lowest, cmp) = book.best_price(better.observation.product_identity).await.unwrap().unwrap();
        assert_eq!(lowest.store_name, "Costco");
        assert!(cmp.is_best);
    }

    #[tokio::test]
    async fn edit_recomputes_unit_price() {
        let book = book();
        let outcome = book.record(&draft("PX Mart", 40.0), "amy").await.unwrap();
        let edited = book
            .edit(&outcome.observation.id, &ObservationEdit { special_price: Some(20.0), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(edited.total_price, 20.0);
        assert_eq!(edited.unit_price, Some(5.0));

        let cleared = book
            .edit(&outcome.observation.id, &ObservationEdit { store_name: Some(" ".to_string()), ..Default::default() })
            .await;
        assert!(cleared.is_err());
        assert!(book.edit("missing", &ObservationEdit::default()).await.is_err());
    }

    #[tokio::test]
    async fn review_queue_compares_pending_entries() {
        let book = book();
        let a = book.enqueue(&draft("PX Mart", 40.0), "amy").await;
        let b = book.enqueue(&draft("Costco", 32.0), "amy").await;
        assert!(!book.review(&a.id).await.unwrap().is_best);
        assert!(book.review(&b.id).await.unwrap().is_best);

        book.commit(&b.id).await.unwrap();
        assert_eq!(book.pending().await.len(), 1);
        let res = book.review(&a.id).await.unwrap();
        assert_eq!(res.reference_store.as_deref(), Some("Costco"));

        assert!(book.discard(&a.id).await);
        assert!(!book.discard(&a.id).await);
        assert!(book.review(&a.id).await.is_err());
    }

    #[tokio::test]
    async fn commit_keeps_invalid_entries_queued() {
        let book = book();
        let mut d = draft("", 40.0);
        d.store_name = None;
        let queued = book.enqueue(&d, "amy").await;
        assert!(book.commit(&queued.id).await.is_err());
        assert_eq!(book.pending().await.len(), 1);

        book.amend(&queued.id, &ObservationEdit { store_name: Some("PX Mart".to_string()), ..Default::default() })
            .await
            .unwrap();
        book.commit(&queued.id).await.unwrap();
        assert!(book.pending().await.is_empty());
    }

    #[tokio::test]
    async fn amended_store_rekeys_queued_entry() {
        let book = book();
        let tea = ObservationDraft {
            product_name: "Tea".to_string(),
            original_price: Some(30.0),
            ..Default::default()
        };
        let queued = book.enqueue(&tea, "amy").await;
        let amended = book
            .amend(&queued.id, &ObservationEdit { store_name: Some("Costco".to_string()), ..Default::default() })
            .await
            .unwrap();
        let expected = compute_identity(None, Some("Tea"), Some("Costco"));
        assert_eq!(amended.product_identity, expected);

        let saved = book.commit(&queued.id).await.unwrap();
        assert_eq!(saved.observation.product_identity, expected);

        let later = ObservationDraft { store_name: Some("Costco".to_string()), original_price: Some(28.0), ..tea };
        let outcome = book.record(&later, "amy").await.unwrap();
        assert_ne!(outcome.comparison.message, "first record");
        assert_eq!(outcome.comparison.reference_price, Some(30.0));
        assert_eq!(book.history(expected).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn amend_keeps_barcode_identity() {
        let book = book();
        let queued = book.enqueue(&draft("PX Mart", 40.0), "amy").await;
        let amended = book
            .amend(&queued.id, &ObservationEdit { store_name: Some("Costco".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(amended.product_identity, compute_identity(Some("4710000000001"), None, None));
    }

    #[tokio::test]
    async fn commit_keeps_entry_queued_when_store_fails() {
        // a directory cannot be read as the store document
        let book = PriceBook::new(JsonFileStore::new(std::env::temp_dir()), AnomalyDetector::default());
        let queued = book.enqueue(&draft("PX Mart", 40.0), "amy").await;
        assert!(book.commit(&queued.id).await.is_err());
        let pending = book.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, queued.id);
    }

    #[tokio::test]
    async fn batch_edit_detects_concurrent_changes() {
        let book = book();
        book.record(&draft("PX Mart", 40.0), "amy").await.unwrap();
        let snapshot = book.begin_batch_edit().await.unwrap();
        assert_eq!(book.finish_batch_edit(&snapshot).await.unwrap(), Reconcile::Clean);

        book.record(&draft("Costco", 30.0), "other-session").await.unwrap();
        assert_eq!(
            book.finish_batch_edit(&snapshot).await.unwrap(),
            Reconcile::Conflict { expected: 1, actual: 2 }
        );
        // reconciling again on the same inputs gives the same answer
        assert_eq!(
            book.finish_batch_edit(&snapshot).await.unwrap(),
            Reconcile::Conflict { expected: 1, actual: 2 }
        );
    }
}
