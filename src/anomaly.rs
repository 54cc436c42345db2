use serde::Serialize;

use crate::data::{PriceObservation, ReviewFlag};

pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.8;

/// History size at which data confidence saturates.
const SATURATION_POINTS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    NoValidData,
    SignificantlyHigher,
    SignificantlyLower,
    Normal,
}

impl AnomalyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyReason::NoValidData => "no_valid_data",
            AnomalyReason::SignificantlyHigher => "significantly_higher",
            AnomalyReason::SignificantlyLower => "significantly_lower",
            AnomalyReason::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub is_anomalous: bool,
    pub confidence: f64,
    pub reason: AnomalyReason,
    pub deviation: f64,
    pub average_price: f64,
    pub data_points: usize,
}

/// Flags a price whose distance from the historical mean exceeds a threshold,
/// but only when the history is large and tight enough to trust.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    deviation_threshold: f64,
    min_confidence: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DEVIATION_THRESHOLD, DEFAULT_MIN_CONFIDENCE)
    }
}

impl AnomalyDetector {
    pub fn new(deviation_threshold: f64, min_confidence: f64) -> Self {
        Self { deviation_threshold, min_confidence }
    }

    pub fn detect(&self, current_price: f64, history: &[f64]) -> AnomalyReport {
        let prices: Vec<f64> = history.iter().copied().filter(|p| p.is_finite() && *p > 0.0).collect();
        if prices.is_empty() {
            return AnomalyReport {
                is_anomalous: false,
                confidence: 0.0,
                reason: AnomalyReason::NoValidData,
                deviation: 0.0,
                average_price: 0.0,
                data_points: 0,
            };
        }

        let n = prices.len() as f64;
        let mean = prices.iter().sum::<f64>() / n;
        let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let deviation = (current_price - mean).abs() / mean;
        let data_confidence = (n / SATURATION_POINTS).min(1.0);
        let stability_confidence = (1.0 - std_dev / mean).max(0.0);
        let confidence = (data_confidence + stability_confidence) / 2.0;

        let is_anomalous = deviation > self.deviation_threshold && confidence > self.min_confidence;
        let reason = match (is_anomalous, current_price > mean) {
            (false, _) => AnomalyReason::Normal,
            (true, true) => AnomalyReason::SignificantlyHigher,
            (true, false) => AnomalyReason::SignificantlyLower,
        };

        AnomalyReport { is_anomalous, confidence, reason, deviation, average_price: mean, data_points: prices.len() }
    }

    /// Run detection over the paid totals of stored observations.
    pub fn detect_in(&self, current_price: f64, history: &[PriceObservation]) -> AnomalyReport {
        let totals: Vec<f64> = history.iter().map(|o| o.total_price).collect();
        self.detect(current_price, &totals)
    }
}

/// Detection with the default thresholds.
pub fn detect_anomaly(current_price: f64, history: &[f64]) -> AnomalyReport {
    AnomalyDetector::default().detect(current_price, history)
}

/// Tag a record for manual review when the report is anomalous. Returns
/// whether a flag was set; nothing else acts on it.
pub fn flag_for_review(observation: &mut PriceObservation, report: &AnomalyReport, now_ms: u64) -> bool {
    if !report.is_anomalous {
        return false;
    }
    observation.review_flag = Some(ReviewFlag { reason: report.reason.as_str().to_string(), flagged_at: now_ms });
    true
}

pub fn clear_review_flag(observation: &mut PriceObservation) -> bool {
    observation.review_flag.take().is_some()
}
