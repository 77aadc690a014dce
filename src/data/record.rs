use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

pub const MAX_SYMBOL_LEN: usize = 32;

/// Normalized last-known value for one symbol, produced by every driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub symbol: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl CachedRecord {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change: None,
            change_percent: None,
            volume: None,
            timestamp: Utc::now(),
        }
    }

    /// Fills change and change percent relative to a reference price.
    pub fn with_change_from(mut self, reference: f64) -> Self {
        if reference > 0.0 {
            let change = self.price - reference;
            self.change = Some(change);
            self.change_percent = Some(change / reference * 100.0);
        }
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Trims and upper-cases a caller-supplied symbol, rejecting malformed input.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim();

    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return Err(FeedError::InvalidSymbol(raw.to_string()));
    }

    let valid = symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | '=' | '^'));
    if !valid {
        return Err(FeedError::InvalidSymbol(raw.to_string()));
    }

    Ok(symbol.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_is_derived_from_reference() {
        let record = CachedRecord::new("AAPL", 110.0).with_change_from(100.0);
        assert_eq!(record.change, Some(10.0));
        assert_eq!(record.change_percent, Some(10.0));
    }

    #[test]
    fn test_zero_reference_leaves_change_empty() {
        let record = CachedRecord::new("AAPL", 110.0).with_change_from(0.0);
        assert!(record.change.is_none());
        assert!(record.change_percent.is_none());
    }

    #[test]
    fn test_optional_fields_are_omitted_from_json() {
        let json = CachedRecord::new("EUA", 85.0).to_json().unwrap();
        assert!(json.contains("\"symbol\":\"EUA\""));
        assert!(!json.contains("change"));
        assert!(!json.contains("volume"));
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
        assert_eq!(normalize_symbol("^gspc").unwrap(), "^GSPC");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("   ").is_err());
        assert!(normalize_symbol("AA PL").is_err());
        assert!(normalize_symbol(&"X".repeat(MAX_SYMBOL_LEN + 1)).is_err());
    }
}
