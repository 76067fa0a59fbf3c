use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotone archive version. Incremented by each effective commit;
/// version increments are the only externally observable mutation events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ArchiveVersion(pub u64);

impl ArchiveVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Deterministic batch identifier: BLAKE3 over the raw input rows in
/// arrival order. Two submissions of the same batch share a BatchId.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    /// Hash the canonical JSON serialization of the raw rows.
    pub fn from_rows(rows: &[crate::normalize::RawRow]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for row in rows {
            // BTreeMap keys serialize in sorted order, so this is canonical.
            let json = serde_json::to_string(row).unwrap_or_default();
            hasher.update(json.as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Short prefix for filenames and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RawRow;
    use serde_json::json;

    fn row(symbol: &str) -> RawRow {
        let mut r = RawRow::new();
        r.insert("symbol".into(), json!(symbol));
        r.insert("close".into(), json!(100.0));
        r
    }

    #[test]
    fn batch_id_deterministic() {
        let rows = vec![row("BTC"), row("ETH")];
        assert_eq!(BatchId::from_rows(&rows), BatchId::from_rows(&rows));
    }

    #[test]
    fn batch_id_is_order_sensitive() {
        let ab = vec![row("BTC"), row("ETH")];
        let ba = vec![row("ETH"), row("BTC")];
        assert_ne!(BatchId::from_rows(&ab), BatchId::from_rows(&ba));
    }

    #[test]
    fn version_increments() {
        let v = ArchiveVersion::default();
        assert_eq!(v.next(), ArchiveVersion(1));
        assert_eq!(v.next().to_string(), "v1");
    }
}
