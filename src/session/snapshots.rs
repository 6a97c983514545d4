//! Snapshot manager: открытые точки обзора сессии.
//!
//! SnapshotEntry держит пин seq в движке и снимает его в Drop. Записи раздаются
//! как Arc: итератор и запрос, который сейчас читает, держат свою копию, поэтому
//! пин переживает dispose до конца уже начатого чтения.

use log::debug;
use std::sync::Arc;

use super::Session;
use crate::engine::{Engine, Seq};
use crate::error::{ProtoError, ProtoResult};
use crate::metrics::{record_snapshot_close, record_snapshot_open};

pub struct SnapshotEntry {
    seq: Seq,
    engine: Arc<dyn Engine>,
}

impl SnapshotEntry {
    fn pin(engine: Arc<dyn Engine>) -> Self {
        let seq = engine.pin_snapshot();
        record_snapshot_open();
        Self { seq, engine }
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }
}

impl Drop for SnapshotEntry {
    fn drop(&mut self) {
        self.engine.release_snapshot(self.seq);
        record_snapshot_close();
    }
}

impl Session {
    /// `_db.usesnapshot`
    pub fn open_snapshot(&self) -> ProtoResult<u64> {
        let mut snaps = self.snapshots.lock().unwrap();
        self.ensure_open()?;
        if snaps.len() >= snaps.limit() {
            return Err(ProtoError::exhausted("snapshots", snaps.limit()));
        }
        let entry = Arc::new(SnapshotEntry::pin(self.engine.clone()));
        let seq = entry.seq();
        let h = snaps
            .insert(entry)
            .ok_or_else(|| ProtoError::exhausted("snapshots", snaps.limit()))?;
        debug!("session {}: snapshot {} at seq {}", self.id, h, seq);
        Ok(h)
    }

    /// `_db.disposeSnapshot`: снапшот и все его итераторы.
    pub fn dispose_snapshot(&self, snapid: u64) -> ProtoResult<()> {
        let mut snaps = self.snapshots.lock().unwrap();
        let entry = snaps
            .remove(snapid)
            .ok_or_else(|| ProtoError::invalid_handle("snapid", snapid))?;
        let orphans = self
            .iterators
            .lock()
            .unwrap()
            .extract_if(|_, it| it.snapid != snapid);
        drop(snaps);
        debug!(
            "session {}: snapshot {} (seq {}) disposed with {} iterators",
            self.id,
            snapid,
            entry.seq(),
            orphans.len()
        );
        Ok(())
    }

    /// Найти открытый снапшот. snapid = 0 или чужой/закрытый — InvalidHandle.
    pub(crate) fn snapshot(&self, snapid: u64) -> ProtoResult<Arc<SnapshotEntry>> {
        self.snapshots
            .lock()
            .unwrap()
            .get(snapid)
            .cloned()
            .ok_or_else(|| ProtoError::invalid_handle("snapid", snapid))
    }
}
