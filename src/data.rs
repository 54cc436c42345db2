use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::identity::{ProductId, compute_identity};
use crate::pricing::{UnitKind, calculate_unit_price, parse_decimal, resolve_effective_price};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Read a number the way stored and extracted records carry it: JSON numbers,
/// numeric strings, or anything else as absent.
pub fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn lenient_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_number(&value))
}

/// Unreadable prices become NaN so comparisons rank them last instead of
/// failing the whole history load.
fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_number(&value).unwrap_or(f64::NAN))
}

/// Unknown or malformed unit kinds fall back to pieces.
fn lenient_unit<'de, D>(deserializer: D) -> Result<UnitKind, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => UnitKind::parse(&s),
        _ => UnitKind::default(),
    })
}

fn missing_price() -> f64 {
    f64::NAN
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Advisory tag put on a record for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlag {
    pub reason: String,
    pub flagged_at: u64,
}

/// One recorded sighting of a product's price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    pub id: String,
    pub product_identity: ProductId,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub store_name: String,
    /// Effective price paid.
    #[serde(default = "missing_price", deserialize_with = "lenient_price")]
    pub total_price: f64,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub original_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub special_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_unit")]
    pub unit_kind: UnitKind,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub discount_note: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub recorded_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_flag: Option<ReviewFlag>,
}

impl PriceObservation {
    /// Build a record from capture-time input. The identity, effective price
    /// and unit price are all derived here.
    pub fn from_draft(draft: &ObservationDraft, recorded_by: &str, timestamp: u64) -> Self {
        let product_identity = draft.identity();
        let mut observation = Self {
            id: format!("{}-{}-{:08x}", product_identity, timestamp, rand::random::<u32>()),
            product_identity,
            product_name: draft.product_name.trim().to_string(),
            store_name: draft.store_name.clone().unwrap_or_default().trim().to_string(),
            total_price: 0.0,
            original_price: draft.original_price,
            special_price: draft.special_price,
            quantity: draft.quantity,
            unit_kind: draft.unit_kind,
            unit_price: None,
            discount_note: draft.discount_note.trim().to_string(),
            timestamp,
            recorded_by: recorded_by.to_string(),
            review_flag: None,
        };
        observation.reprice();
        observation
    }

    /// Recompute the effective and unit prices from the stored inputs.
    /// A record with neither original nor special price keeps its total.
    pub fn reprice(&mut self) {
        if self.original_price.is_some() || self.special_price.is_some() {
            self.total_price = resolve_effective_price(self.original_price, self.special_price);
        }
        self.unit_price = calculate_unit_price(self.total_price, self.quantity, self.unit_kind);
    }

    /// Apply a manual edit and keep the derived prices consistent with it.
    /// The product identity never changes.
    pub fn apply_edit(&mut self, edit: &ObservationEdit) {
        if let Some(name) = &edit.product_name {
            self.product_name = name.trim().to_string();
        }
        if let Some(store) = &edit.store_name {
            self.store_name = store.trim().to_string();
        }
        if let Some(total) = edit.total_price {
            self.original_price = None;
            self.special_price = None;
            self.total_price = total;
        }
        if let Some(original) = edit.original_price {
            self.original_price = Some(original);
        }
        if let Some(special) = edit.special_price {
            self.special_price = Some(special);
        }
        if edit.clear_special_price {
            self.special_price = None;
        }
        if let Some(quantity) = edit.quantity {
            self.quantity = Some(quantity);
        }
        if let Some(kind) = edit.unit_kind {
            self.unit_kind = kind;
        }
        if let Some(note) = &edit.discount_note {
            self.discount_note = note.trim().to_string();
        }
        self.reprice();
    }

    pub fn has_discount(&self) -> bool {
        !self.discount_note.trim().is_empty()
    }
}

/// Lightweight product record, created the first time an observation is saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_identity: ProductId,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub created_at: u64,
}

/// Capture-time input, typed by hand or converted from model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservationDraft {
    pub barcode: Option<String>,
    pub product_name: String,
    pub store_name: Option<String>,
    pub original_price: Option<f64>,
    pub special_price: Option<f64>,
    pub quantity: Option<f64>,
    pub unit_kind: UnitKind,
    pub discount_note: String,
}

impl ObservationDraft {
    pub fn identity(&self) -> ProductId {
        compute_identity(
            self.barcode.as_deref().map(str::trim),
            Some(self.product_name.trim()),
            self.store_name.as_deref().map(str::trim),
        )
    }

    pub fn effective_price(&self) -> f64 {
        resolve_effective_price(self.original_price, self.special_price)
    }
}

/// Replacement values for a manual edit; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationEdit {
    pub product_name: Option<String>,
    pub store_name: Option<String>,
    /// Overrides the paid price directly and drops the original/special pair.
    pub total_price: Option<f64>,
    pub original_price: Option<f64>,
    pub special_price: Option<f64>,
    pub clear_special_price: bool,
    pub quantity: Option<f64>,
    pub unit_kind: Option<UnitKind>,
    pub discount_note: Option<String>,
}

/// Structured fields returned by the vision model. Every field is optional
/// and malformed values read as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(default, deserialize_with = "lenient_text")]
    pub scanned_barcode: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub original_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub special_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub listed_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub total_capacity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub base_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub store_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub discount_details: Option<String>,
}

impl ExtractedFields {
    /// Convert to a draft. `listedPrice` stands in for the original price
    /// when the model did not separate original and special prices.
    pub fn into_draft(self) -> ObservationDraft {
        ObservationDraft {
            barcode: self.scanned_barcode,
            product_name: self.product_name.unwrap_or_default(),
            store_name: self.store_name,
            original_price: self.original_price.or(self.listed_price),
            special_price: self.special_price,
            quantity: self.total_capacity,
            unit_kind: self.base_unit.as_deref().map(UnitKind::parse).unwrap_or_default(),
            discount_note: self.discount_details.unwrap_or_default(),
        }
    }
}
