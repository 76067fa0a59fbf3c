//! Domain types: records, keys, identifiers.

pub mod ids;
pub mod record;

pub use ids::{ArchiveVersion, BatchId};
pub use record::{AssetRecord, RecordKey};
