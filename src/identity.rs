use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable join key for observations of the same product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u32);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DJB2 over UTF-16 code units with u32 wraparound, so identities agree with
/// ids produced by browser clients for the same string.
pub fn djb2(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(5381u32, |acc, unit| acc.wrapping_mul(33).wrapping_add(unit as u32))
}

/// Identity from the barcode when one was scanned, otherwise from `name-store`.
pub fn compute_identity(barcode: Option<&str>, name: Option<&str>, store: Option<&str>) -> ProductId {
    match barcode {
        Some(code) if !code.is_empty() => ProductId(djb2(code)),
        _ => {
            let key = format!("{}-{}", name.unwrap_or_default(), store.unwrap_or_default());
            ProductId(djb2(&key))
        }
    }
}
