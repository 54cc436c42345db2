use serde::Serialize;

use crate::data::PriceObservation;
use crate::pricing::format_unit_price;

pub const FIRST_RECORD: &str = "first record";

/// Outcome of checking one observation against the known history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub is_best: bool,
    pub reference_price: Option<f64>,
    pub reference_store: Option<String>,
    pub message: String,
}

impl ComparisonResult {
    fn first_record() -> Self {
        Self { is_best: true, reference_price: None, reference_store: None, message: FIRST_RECORD.to_string() }
    }
}

/// Non-finite values rank as infinitely expensive.
fn rank(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(f64::INFINITY)
}

/// First minimum in encounter order; a later entry only replaces it when
/// strictly smaller.
fn first_minimum<'a, I, F>(entries: I, key: F) -> Option<&'a PriceObservation>
where
    I: IntoIterator<Item = &'a PriceObservation>,
    F: Fn(&PriceObservation) -> f64,
{
    entries.into_iter().fold(None, |best, entry| match best {
        Some(current) if key(entry) >= key(current) => Some(current),
        _ => Some(entry),
    })
}

/// Headline comparison on `totalPrice`. An exact tie only counts as best when
/// the candidate carries a discount note.
pub fn compare(candidate: &PriceObservation, history: &[PriceObservation]) -> ComparisonResult {
    let total = |o: &PriceObservation| rank(Some(o.total_price));
    let Some(reference) = first_minimum(history, total) else {
        return ComparisonResult::first_record();
    };

    let price = total(candidate);
    let reference_price = total(reference);
    let is_current_best = price.is_finite() && price <= reference_price;
    let is_best =
        is_current_best && (price < reference_price || (price == reference_price && candidate.has_discount()));

    let message = if !price.is_finite() {
        "no valid price to compare".to_string()
    } else if !is_best && is_current_best {
        format!("same as the lowest price at {}", reference.store_name)
    } else if price == reference_price {
        "ties the lowest price with a discount".to_string()
    } else if is_best {
        "lowest price so far".to_string()
    } else {
        format!("cheaper at {} for {:.2}", reference.store_name, reference_price)
    };

    ComparisonResult {
        is_best,
        reference_price: Some(reference_price).filter(|v| v.is_finite()),
        reference_store: Some(reference.store_name.clone()),
        message,
    }
}

/// Review-queue comparison on `unitPrice`. Persisted history and pending
/// (unsaved) observations for the same product are ranked together; the
/// candidate itself is skipped. Missing unit prices rank last and a candidate
/// without one never wins against a non-empty set. Ties count as best.
pub fn compare_unit_price(
    candidate: &PriceObservation,
    history: &[PriceObservation],
    pending: &[PriceObservation],
) -> ComparisonResult {
    let peers = history
        .iter()
        .chain(pending.iter().filter(|p| p.product_identity == candidate.product_identity))
        .filter(|o| o.id != candidate.id);
    let unit = |o: &PriceObservation| rank(o.unit_price);
    let Some(reference) = first_minimum(peers, unit) else {
        return ComparisonResult::first_record();
    };

    let price = unit(candidate);
    let reference_price = unit(reference);
    let is_best = price.is_finite() && price <= reference_price;

    let message = if !price.is_finite() {
        "no unit price to compare".to_string()
    } else if is_best {
        format!("lowest unit price {} per {}", format_unit_price(candidate.unit_price), candidate.unit_kind.label())
    } else {
        format!(
            "cheaper at {}: {} per {}",
            reference.store_name,
            format_unit_price(reference.unit_price),
            reference.unit_kind.label()
        )
    };

    ComparisonResult {
        is_best,
        reference_price: Some(reference_price).filter(|v| v.is_finite()),
        reference_store: Some(reference.store_name.clone()),
        message,
    }
}
