//! Personal data access with a deduplicating merge and an incremental cache.
//!
//! Data modules ([`modules`]) parse exports of some tool's history, merge the
//! overlapping backups ([`merge`]) and cache the merged result keyed on a
//! fingerprint of their inputs ([`cache`], [`fingerprint`]).

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod inputs;
pub mod merge;
pub mod module;
pub mod modules;
pub mod pool;
pub mod query;
pub mod types;
pub mod utils;
