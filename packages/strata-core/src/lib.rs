//! Strata core -- the point/record data model, a growable block store, a
//! trie-shaped index, and the epoch that binds them together.
//!
//! An epoch is one time partition of the database: it owns an independent
//! [`Index`] (mapping field paths to record identifiers) and an
//! independent [`BlockStore`] (the accumulated points for those records).
//! Callers drive an epoch directly with [`Epoch::track`] and
//! [`Epoch::fetch`]; opening, reusing, and evicting epochs under an LRU
//! policy is the job of the `strata-engine` crate.
//!
//! - **Point** ([`point`]): the additive `(total, count)` accumulator.
//! - **Block store** ([`block`]): the growable record array.
//! - **Index** ([`index`]): the field-path trie.
//! - **Epoch** ([`epoch`]): binds the two above.
//! - **Error** ([`error`]): the `StrataError` hierarchy shared by both
//!   crates in this workspace.

mod block;
mod epoch;
mod error;
mod index;
mod point;
mod record;

pub use block::BlockStore;
pub use epoch::Epoch;
pub use error::{Result, StrataError, Subsystem};
pub use index::{Index, IndexNode};
pub use point::Point;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        let _ = Point::ZERO;
    }

    #[test]
    fn reexports_accessible() {
        let dir = tempfile::tempdir().unwrap();
        let epoch = Epoch::open(dir.path().join("epoch"), 4, false).unwrap();
        epoch.track(0, &["a".to_string()], 1.0, 1.0).unwrap();
        let (series, nodes) = epoch.fetch(0, 4, &["a".to_string()]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(series[0][0], Point::new(1.0, 1.0));
        epoch.close().unwrap();
    }
}
