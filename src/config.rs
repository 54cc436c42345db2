use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::anomaly::{DEFAULT_DEVIATION_THRESHOLD, DEFAULT_MIN_CONFIDENCE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    pub extraction_url: Option<String>,
    pub extraction_max_attempts: u32,
    pub extraction_backoff_ms: u64,
    pub deviation_threshold: f64,
    pub min_confidence: f64,
    pub recorded_by: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("price-scout.json"),
            extraction_url: None,
            extraction_max_attempts: 3,
            extraction_backoff_ms: 500,
            deviation_threshold: DEFAULT_DEVIATION_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            recorded_by: "anonymous".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Defaults or the given file, then `PRICE_SCOUT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("PRICE_SCOUT_STORE") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRICE_SCOUT_EXTRACT_URL").filter(|v| !v.is_empty()) {
            self.extraction_url = Some(v);
        }
        if let Some(v) = lookup("PRICE_SCOUT_RECORDED_BY") {
            self.recorded_by = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"deviation_threshold": 0.3}"#).unwrap();
        assert_eq!(config.deviation_threshold, 0.3);
        assert_eq!(config.min_confidence, DEFAULT_MIN_CONFIDENCE);
        assert_eq!(config.extraction_max_attempts, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let config = Config::default().with_overrides(|key| match key {
            "PRICE_SCOUT_STORE" => Some("/tmp/prices.json".to_string()),
            "PRICE_SCOUT_EXTRACT_URL" => Some("http://localhost:8787/extract".to_string()),
            _ => None,
        });
        assert_eq!(config.store_path, PathBuf::from("/tmp/prices.json"));
        assert_eq!(config.extraction_url.as_deref(), Some("http://localhost:8787/extract"));
        assert_eq!(config.recorded_by, "anonymous");
    }
}
