//! Iterator manager: курсоры по `[begin, end)` одной таблицы в снапшоте.
//!
//! Состояния:
//!   Created --SeekToFirst|Next--> Positioned <--Next--> Positioned | Exhausted
//!   Reset из любого состояния --> Created
//!
//! Next из Created ведёт себя как SeekToFirst. Позиция хранится как (key, value):
//! снапшот неизменен, так что value не устаревает, а следующий шаг — seek строго
//! после key.

use log::debug;
use std::sync::{Arc, Mutex};

use super::snapshots::SnapshotEntry;
use super::Session;
use crate::engine::KeyRange;
use crate::error::{ProtoError, ProtoResult};
use crate::metrics::{record_iterator_close, record_iterator_open};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    Created,
    Positioned { key: Vec<u8>, value: Vec<u8> },
    Exhausted,
}

pub struct IteratorEntry {
    pub(crate) snapid: u64,
    snapshot: Arc<SnapshotEntry>,
    table: Vec<u8>,
    range: KeyRange,
    state: Mutex<CursorState>,
}

impl IteratorEntry {
    fn new(snapid: u64, snapshot: Arc<SnapshotEntry>, table: Vec<u8>, range: KeyRange) -> Self {
        record_iterator_open();
        Self {
            snapid,
            snapshot,
            table,
            range,
            state: Mutex::new(CursorState::Created),
        }
    }
}

impl Drop for IteratorEntry {
    fn drop(&mut self) {
        record_iterator_close();
    }
}

/// Пустые границы — то же самое, что отсутствующие.
fn bound(b: &[u8]) -> Option<Vec<u8>> {
    if b.is_empty() {
        None
    } else {
        Some(b.to_vec())
    }
}

impl Session {
    /// `_db.snapshot.newiterator`
    pub fn new_iterator(
        &self,
        snapid: u64,
        tableid: &[u8],
        begin: &[u8],
        end: Option<&[u8]>,
    ) -> ProtoResult<u64> {
        if tableid.is_empty() {
            return Err(ProtoError::invalid_argument("tableid must not be empty"));
        }
        let range = KeyRange::new(bound(begin), end.and_then(bound));
        if let (Some(b), Some(e)) = (&range.begin, &range.end) {
            if b > e {
                return Err(ProtoError::invalid_argument("iterator range: begin > end"));
            }
        }

        // snapshots -> iterators: тот же порядок, что и в dispose_snapshot, так что
        // итератор не может пережить свой снапшот.
        let snaps = self.snapshots.lock().unwrap();
        let snapshot = snaps
            .get(snapid)
            .cloned()
            .ok_or_else(|| ProtoError::invalid_handle("snapid", snapid))?;
        let mut iters = self.iterators.lock().unwrap();
        self.ensure_open()?;
        if iters.len() >= iters.limit() {
            return Err(ProtoError::exhausted("iterators", iters.limit()));
        }
        let entry = IteratorEntry::new(snapid, snapshot, tableid.to_vec(), range);
        let h = iters
            .insert(Arc::new(entry))
            .ok_or_else(|| ProtoError::exhausted("iterators", iters.limit()))?;
        drop(iters);
        drop(snaps);
        debug!("session {}: iterator {} on snapshot {}", self.id, h, snapid);
        Ok(h)
    }

    fn iterator(&self, itid: u64) -> ProtoResult<Arc<IteratorEntry>> {
        self.iterators
            .lock()
            .unwrap()
            .get(itid)
            .cloned()
            .ok_or_else(|| ProtoError::invalid_handle("itid", itid))
    }

    /// Первый ключ строго после `after` (или первый в диапазоне).
    fn step(&self, it: &IteratorEntry, after: Option<&[u8]>) -> ProtoResult<CursorState> {
        let found = self
            .engine
            .seek(&it.table, &it.range, after, it.snapshot.seq())
            .map_err(ProtoError::engine)?;
        Ok(match found {
            Some((key, value)) => CursorState::Positioned { key, value },
            None => CursorState::Exhausted,
        })
    }

    /// `_db.iterator.seektofirst`
    pub fn iterator_seek_to_first(&self, itid: u64) -> ProtoResult<bool> {
        let it = self.iterator(itid)?;
        let mut st = it.state.lock().unwrap();
        *st = self.step(&it, None)?;
        Ok(matches!(*st, CursorState::Positioned { .. }))
    }

    /// `_db.iterator.next`
    pub fn iterator_next(&self, itid: u64) -> ProtoResult<bool> {
        let it = self.iterator(itid)?;
        let mut st = it.state.lock().unwrap();
        let next = match &*st {
            CursorState::Created => self.step(&it, None)?,
            CursorState::Positioned { key, .. } => self.step(&it, Some(key.as_slice()))?,
            CursorState::Exhausted => return Ok(false),
        };
        *st = next;
        Ok(matches!(*st, CursorState::Positioned { .. }))
    }

    /// `_db.iterator.current`: (key, value) текущей позиции.
    pub fn iterator_current(&self, itid: u64) -> ProtoResult<(Vec<u8>, Vec<u8>)> {
        let it = self.iterator(itid)?;
        let st = it.state.lock().unwrap();
        match &*st {
            CursorState::Positioned { key, value } => Ok((key.clone(), value.clone())),
            CursorState::Created => Err(ProtoError::invalid_state(
                "iterator is not positioned (call seektofirst or next)",
            )),
            CursorState::Exhausted => Err(ProtoError::invalid_state(
                "iterator is exhausted (call reset or seektofirst)",
            )),
        }
    }

    /// `_db.iterator.reset`
    pub fn iterator_reset(&self, itid: u64) -> ProtoResult<bool> {
        let it = self.iterator(itid)?;
        *it.state.lock().unwrap() = CursorState::Created;
        Ok(true)
    }

    /// `_db.iterator.dispose`
    pub fn dispose_iterator(&self, itid: u64) -> ProtoResult<()> {
        self.iterators
            .lock()
            .unwrap()
            .remove(itid)
            .map(|_| ())
            .ok_or_else(|| ProtoError::invalid_handle("itid", itid))
    }
}
