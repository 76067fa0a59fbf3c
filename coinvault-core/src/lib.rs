//! Coinvault Core — domain types and the validation pipeline stages.
//!
//! This crate contains the heart of the dataset construction engine:
//! - Domain types (asset records, keys, batch ids, archive versions)
//! - Record normalizer (raw untyped rows → canonical `AssetRecord`)
//! - Same-batch deduplicator (deterministic last-arrival-wins)
//! - Invariant validator (missing values, price positivity, low/high
//!   ordering, committed-archive conflicts)
//! - Versioned archive with whole-batch atomic commits and a read API
//! - Parquet persistence with a manifest as the durable commit point

pub mod archive;
pub mod dedup;
pub mod domain;
pub mod normalize;
pub mod validate;
