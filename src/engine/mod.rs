//! engine — хранилище, которое обслуживает протокол.
//!
//! Протокольный слой видит только трейт Engine. Реализация в этом крейте:
//! - mvcc.rs  — многоверсионная карта (table -> key -> цепочка версий), пины снапшотов, GC;
//! - batch_log.rs — batch log: одна CRC-запись на закоммиченный батч, реплей при открытии;
//! - store.rs — Store: mvcc + опциональный лог + эксклюзивная блокировка каталога.

use anyhow::Result;
use std::ops::Bound;

pub mod batch_log;
pub mod mvcc;
pub mod store;

pub use store::{Store, StoreStats};

/// Monotonic commit sequence number. 0 = empty store, first commit gets 1.
pub type Seq = u64;

/// One staged mutation. Tables partition the keyspace: the same key bytes in
/// different tables never collide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        table: Vec<u8>,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: Vec<u8>,
        key: Vec<u8>,
    },
}

impl WriteOp {
    pub fn table(&self) -> &[u8] {
        match self {
            WriteOp::Put { table, .. } | WriteOp::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }
}

/// Half-open key range `[begin, end)`; `None` = unbounded on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub begin: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn new(begin: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self { begin, end }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(b) = &self.begin {
            if key < b.as_slice() {
                return false;
            }
        }
        if let Some(e) = &self.end {
            if key >= e.as_slice() {
                return false;
            }
        }
        true
    }

    /// Границы для BTreeMap::range с учётом позиции курсора (строго после `after`).
    /// None — диапазон заведомо пуст (range() с такими границами запаниковал бы).
    pub(crate) fn bounds_after<'a>(
        &'a self,
        after: Option<&'a [u8]>,
    ) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
        let lower: Bound<&[u8]> = match (after, self.begin.as_deref()) {
            (Some(a), Some(b)) if a < b => Bound::Included(b),
            (Some(a), _) => Bound::Excluded(a),
            (None, Some(b)) => Bound::Included(b),
            (None, None) => Bound::Unbounded,
        };
        let upper: Bound<&[u8]> = match self.end.as_deref() {
            Some(e) => Bound::Excluded(e),
            None => Bound::Unbounded,
        };
        if let (Bound::Included(l) | Bound::Excluded(l), Bound::Excluded(u)) = (lower, upper) {
            if l >= u {
                return None;
            }
        }
        Some((lower, upper))
    }
}

/// Storage engine consumed by the protocol layer.
///
/// Requirements on implementations:
/// - `apply` is atomic: after it returns Ok all ops are visible at the returned
///   seq and later; on Err none of them are visible, ever.
/// - reads at a pinned seq never observe commits with a larger seq.
/// - readers never wait for the durable part of a commit.
pub trait Engine: Send + Sync {
    /// Latest committed sequence.
    fn latest_seq(&self) -> Seq;

    /// Pin the latest committed state and return its seq. Versions visible at a
    /// pinned seq are retained until `release_snapshot`.
    fn pin_snapshot(&self) -> Seq;

    fn release_snapshot(&self, seq: Seq);

    /// Point read. `at = None` reads the latest committed state.
    fn get(&self, table: &[u8], key: &[u8], at: Option<Seq>) -> Result<Option<Vec<u8>>>;

    /// First live entry of `table` inside `range` whose key is strictly greater
    /// than `after` (or the first in range when `after` is None), as of `at`.
    fn seek(
        &self,
        table: &[u8],
        range: &KeyRange,
        after: Option<&[u8]>,
        at: Seq,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Apply ops in order as one indivisible commit. Returns the commit seq.
    fn apply(&self, ops: &[WriteOp]) -> Result<Seq>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_contains_half_open() {
        let r = KeyRange::new(Some(b"b".to_vec()), Some(b"d".to_vec()));
        assert!(!r.contains(b"a"));
        assert!(r.contains(b"b"));
        assert!(r.contains(b"c\xff"));
        assert!(!r.contains(b"d"));
        assert!(KeyRange::all().contains(b""));
    }

    #[test]
    fn bounds_after_empty_cases() {
        let r = KeyRange::new(Some(b"b".to_vec()), Some(b"d".to_vec()));
        assert!(r.bounds_after(Some(&b"d"[..])).is_none());
        assert!(r.bounds_after(Some(&b"z"[..])).is_none());
        let same = KeyRange::new(Some(b"k".to_vec()), Some(b"k".to_vec()));
        assert!(same.bounds_after(None).is_none());
        // курсор левее begin — стартуем с begin включительно
        assert_eq!(
            r.bounds_after(Some(&b"a"[..])).map(|b| b.0),
            Some(Bound::Included(&b"b"[..]))
        );
    }
}
