//! Strata engine -- the dual-mode LRU [`EpochCache`] that opens, reuses,
//! evicts, expires, syncs, and closes the [`strata_core::Epoch`]s a
//! database router hands out by timestamp-derived key.
//!
//! This crate owns process-level policy; `strata-core` owns the on-disk
//! data structures themselves. A database router (out of scope for this
//! workspace) maps measurement timestamps to epoch keys and supplies an
//! [`EngineConfig`]; an RPC layer (also out of scope) calls `track`/`fetch`
//! on the [`strata_core::Epoch`] handles this cache hands back.

mod cache;
mod config;

pub use cache::EpochCache;
pub use config::EngineConfig;
pub use strata_core::{BlockStore, Epoch, Index, IndexNode, Point, Result, StrataError, Subsystem};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        let _ = EngineConfig::default();
    }

    #[test]
    fn cache_round_trips_through_reexported_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EpochCache::new(dir.path(), EngineConfig { record_size: 2, ..EngineConfig::default() });
        let epoch = cache.load_rw(0).unwrap();
        epoch.track(0, &["a".to_string()], 1.0, 1.0).unwrap();
        let (series, nodes) = epoch.fetch(0, 2, &["a".to_string()]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(series[0][0], Point::new(1.0, 1.0));
        cache.close().unwrap();
    }
}
