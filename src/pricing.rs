use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder shown when there is no usable unit price.
pub const NO_UNIT_PRICE: &str = "--";

const CURRENCY_PREFIXES: &[&str] = &["NT$", "US$", "HK$", "$", "¥", "￥", "€", "£"];

/// Basis a unit price is normalized to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum UnitKind {
    Grams,
    Milliliters,
    #[default]
    Pieces,
}

impl UnitKind {
    /// Map a free-text unit (as printed on labels or returned by the model)
    /// onto a kind. Unrecognized units count as pieces.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "g" | "gr" | "gram" | "grams" | "gramme" | "克" | "公克" => UnitKind::Grams,
            "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" | "毫升" | "c.c." | "cc" => {
                UnitKind::Milliliters
            }
            _ => UnitKind::Pieces,
        }
    }

    /// Quantity the unit price is expressed per.
    pub fn basis(self) -> f64 {
        match self {
            UnitKind::Grams | UnitKind::Milliliters => 100.0,
            UnitKind::Pieces => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UnitKind::Grams => "100g",
            UnitKind::Milliliters => "100ml",
            UnitKind::Pieces => "pc",
        }
    }
}

impl From<String> for UnitKind {
    fn from(raw: String) -> Self {
        UnitKind::parse(&raw)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Grams => write!(f, "grams"),
            UnitKind::Milliliters => write!(f, "milliliters"),
            UnitKind::Pieces => write!(f, "pieces"),
        }
    }
}

/// Why a price could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MissingPrice,
    NonFinitePrice,
    MissingQuantity,
    NonPositiveQuantity,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            InvalidReason::MissingPrice => "no price available",
            InvalidReason::NonFinitePrice => "price is not a finite number",
            InvalidReason::MissingQuantity => "quantity is missing or not a number",
            InvalidReason::NonPositiveQuantity => "quantity must be greater than zero",
        };
        write!(f, "{msg}")
    }
}

/// Tagged result for callers that must not confuse "no data" with a zero price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCheck {
    Valid(f64),
    Invalid(InvalidReason),
}

impl PriceCheck {
    pub fn value(self) -> Option<f64> {
        match self {
            PriceCheck::Valid(v) => Some(v),
            PriceCheck::Invalid(_) => None,
        }
    }

    pub fn is_valid(self) -> bool {
        matches!(self, PriceCheck::Valid(_))
    }
}

/// Parse a price or quantity the way label text is usually written: leading
/// currency marks and thousands separators are dropped and the longest numeric
/// prefix is read, so `"NT$1,299元"` is `1299.0`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let mut text = raw.trim();
    for prefix in CURRENCY_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
            break;
        }
    }
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    let end = numeric_prefix_len(&cleaned);
    if end == 0 {
        return None;
    }
    cleaned[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        digits += j - frac_start;
        if digits > 0 {
            i = j;
        }
    }
    if digits == 0 {
        return 0;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

/// The price actually paid: a special price wins over the original one.
/// Returns 0 when neither is usable; callers read 0 as "no valid price".
pub fn resolve_effective_price(original: Option<f64>, special: Option<f64>) -> f64 {
    resolve_effective_price_checked(original, special).value().unwrap_or(0.0)
}

pub fn resolve_effective_price_checked(original: Option<f64>, special: Option<f64>) -> PriceCheck {
    match (special.filter(|v| v.is_finite()), original.filter(|v| v.is_finite())) {
        (Some(price), _) | (None, Some(price)) => PriceCheck::Valid(price),
        (None, None) => PriceCheck::Invalid(InvalidReason::MissingPrice),
    }
}

/// Per-100g/100ml price for weighed goods, per-piece price otherwise. Unrounded.
pub fn calculate_unit_price(price: f64, quantity: Option<f64>, kind: UnitKind) -> Option<f64> {
    calculate_unit_price_checked(price, quantity, kind).value()
}

pub fn calculate_unit_price_checked(price: f64, quantity: Option<f64>, kind: UnitKind) -> PriceCheck {
    if !price.is_finite() {
        return PriceCheck::Invalid(InvalidReason::NonFinitePrice);
    }
    let quantity = match quantity.filter(|q| q.is_finite()) {
        Some(q) => q,
        None => return PriceCheck::Invalid(InvalidReason::MissingQuantity),
    };
    if quantity <= 0.0 {
        return PriceCheck::Invalid(InvalidReason::NonPositiveQuantity);
    }
    PriceCheck::Valid((price / quantity) * kind.basis())
}

/// Two-decimal display string. Zero is shown as missing since it only ever
/// comes from absent quantity data upstream.
pub fn format_unit_price(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() && v != 0.0 => format!("{:.2}", (v * 100.0).round() / 100.0),
        _ => NO_UNIT_PRICE.to_string(),
    }
}
