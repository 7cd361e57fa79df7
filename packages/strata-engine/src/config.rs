//! The knobs a database router/RPC collaborator would otherwise hardcode.

/// Plain configuration for an [`crate::EpochCache`]: how wide each epoch's
/// block store is, how many epochs may be open per mode, and how much grace
/// a router should give a recently-touched read-only epoch before expiring
/// it.
///
/// No file, environment, or CLI parsing lives here -- that is the embedding
/// binary's job; this struct is the full extent of the ambient configuration
/// surface for this crate.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of point cells per record, forwarded to every block store the
    /// cache opens.
    pub record_size: usize,
    /// Maximum number of simultaneously open read-only epochs.
    pub ro_capacity: usize,
    /// Maximum number of simultaneously open read-write epochs.
    pub rw_capacity: usize,
    /// Duration (in seconds) subtracted from "now" before calling
    /// [`crate::EpochCache::expire`], so a read-only epoch touched moments
    /// ago is not immediately re-evicted by an eager caller.
    pub expiry_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { record_size: 7200, ro_capacity: 16, rw_capacity: 4, expiry_grace_secs: 60 }
    }
}
