pub mod anomaly;
pub mod book;
pub mod comparator;
pub mod config;
pub mod data;
pub mod extract;
pub mod identity;
pub mod pricing;
pub mod store;

pub use anomaly::{AnomalyDetector, AnomalyReport, detect_anomaly};
pub use book::{PriceBook, RecordOutcome, Reconcile};
pub use comparator::{ComparisonResult, compare, compare_unit_price};
pub use data::{ExtractedFields, ObservationDraft, ObservationEdit, PriceObservation, Product};
pub use identity::{ProductId, compute_identity};
pub use pricing::{UnitKind, calculate_unit_price, format_unit_price, resolve_effective_price};
pub use store::{JsonFileStore, MemoryStore, PriceStore};

use anyhow::Result;
use config::Config;

/// Price book backed by the JSON file named in the config.
pub fn open(config: &Config) -> Result<PriceBook<JsonFileStore>> {
    tracing::debug!(path = %config.store_path.display(), "opening price store");
    Ok(PriceBook::from_config(JsonFileStore::new(&config.store_path), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_uses_configured_store() {
        let config = Config {
            store_path: std::env::temp_dir().join(format!("price-scout-open-{:08x}.json", rand::random::<u32>())),
            ..Config::default()
        };
        let book = open(&config).unwrap();
        assert_eq!(book.store().path(), config.store_path.as_path());
        assert_eq!(book.store().count().await.unwrap(), 0);
    }
}
