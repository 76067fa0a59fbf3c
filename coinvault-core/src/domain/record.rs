//! AssetRecord — one daily observation for one cryptocurrency.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique key of a record in the archive: `(asset_id, date)`.
///
/// `Ord` is derived so that archive iteration order is `(asset_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub asset_id: String,
    pub date: NaiveDate,
}

impl RecordKey {
    pub fn new(asset_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            asset_id: asset_id.into(),
            date,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset_id, self.date)
    }
}

/// One validated daily OHLC + metadata observation.
///
/// All numeric fields are normalized to 8 decimal places before a record is
/// constructed, so value equality between re-submitted records is exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub market_cap: f64,
    pub circulating_supply: f64,
    /// All-time-high price at observation time.
    pub ath: f64,
    pub ath_date: NaiveDate,
}

impl AssetRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.asset_id.clone(), self.date)
    }

    /// All price fields, in a fixed order (OHLC then ATH).
    pub fn price_fields(&self) -> [(&'static str, f64); 5] {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("ath", self.ath),
        ]
    }

    /// Non-negative quantity fields, in a fixed order.
    pub fn quantity_fields(&self) -> [(&'static str, f64); 3] {
        [
            ("volume", self.volume),
            ("market_cap", self.market_cap),
            ("circulating_supply", self.circulating_supply),
        ]
    }

    /// Returns true if any numeric field is NaN or infinite.
    pub fn has_missing_values(&self) -> bool {
        self.price_fields()
            .iter()
            .chain(self.quantity_fields().iter())
            .any(|(_, v)| !v.is_finite())
    }

    /// Price positivity: every price field strictly positive, quantities non-negative.
    pub fn prices_positive(&self) -> bool {
        self.price_fields().iter().all(|(_, v)| *v > 0.0)
            && self.quantity_fields().iter().all(|(_, v)| *v >= 0.0)
    }

    /// Low/high ordering: `low <= open, close <= high` and `low <= high`.
    pub fn range_consistent(&self) -> bool {
        self.low <= self.high
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }

    /// Full invariant check used by the validator and the commit write path.
    pub fn is_sane(&self) -> bool {
        !self.has_missing_values() && self.prices_positive() && self.range_consistent()
    }
}
