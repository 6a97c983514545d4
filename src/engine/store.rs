//! engine/store — Store: mvcc-карта + опциональный batch log.
//!
//! Порядок коммита:
//! 1) log mutex — сериализует коммиты и назначает seq;
//! 2) запись батча в лог (+ fsync при data_fsync);
//! 3) короткий write lock карты — батч становится видим целиком.
//! Читатели берут только read lock карты и никогда не ждут лог.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use super::batch_log::{BatchLog, LogRecord};
use super::mvcc::Versions;
use super::{Engine, KeyRange, Seq, WriteOp};
use crate::lock::{try_acquire_exclusive_lock, try_acquire_shared_lock, LockGuard};
use crate::metrics::{record_commit, record_gc_pruned, record_log_compaction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub seq: Seq,
    pub tables: usize,
    pub keys: usize,
    pub versions: usize,
    pub pinned_snapshots: usize,
    /// None для in-memory стора.
    pub log_bytes: Option<u64>,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={} tables={} keys={} versions={} pinned={}",
            self.seq, self.tables, self.keys, self.versions, self.pinned_snapshots
        )?;
        match self.log_bytes {
            Some(b) => write!(f, " log_bytes={}", b),
            None => write!(f, " (in-memory)"),
        }
    }
}

pub struct Store {
    root: Option<PathBuf>,
    state: RwLock<Versions>,
    log: Mutex<Option<BatchLog>>,
    // Some(длина лога) — стор открыт только на чтение.
    read_only: Option<u64>,
    _lock: Option<LockGuard>,
}

impl Store {
    /// Чисто in-memory стор: ничего не переживает процесс.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            state: RwLock::new(Versions::new()),
            log: Mutex::new(None),
            read_only: None,
            _lock: None,
        }
    }

    /// Открыть durable-стор в каталоге root (создаётся при необходимости).
    /// Берёт эксклюзивную блокировку каталога и реплеит batch log.
    pub fn open(root: &Path, fsync: bool) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("create store dir {}", root.display()))?;
        let lock = try_acquire_exclusive_lock(root)?;
        let (log, records) = BatchLog::open_or_create(root, fsync)?;
        let versions = replay(&records);
        info!(
            "store opened at {}: seq={}, {} batches replayed, fsync={}",
            root.display(),
            versions.seq(),
            records.len(),
            fsync
        );

        Ok(Self {
            root: Some(root.to_path_buf()),
            state: RwLock::new(versions),
            log: Mutex::new(Some(log)),
            read_only: None,
            _lock: Some(lock),
        })
    }

    /// Открыть существующий каталог только на чтение (офлайн CLI). На диске
    /// ничего не создаётся и не обрезается; apply и compact_log возвращают ошибку.
    pub fn open_read_only(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("store directory {} does not exist", root.display()));
        }
        let lock = try_acquire_shared_lock(root)?;
        let (records, log_len) = BatchLog::read_only(root)?;
        let versions = replay(&records);
        info!(
            "store opened read-only at {}: seq={}, {} batches replayed",
            root.display(),
            versions.seq(),
            records.len()
        );

        Ok(Self {
            root: Some(root.to_path_buf()),
            state: RwLock::new(versions),
            log: Mutex::new(None),
            read_only: Some(log_len),
            _lock: lock,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_durable(&self) -> bool {
        self.root.is_some()
    }

    /// Переписать лог одной записью текущего состояния. Возвращает новую длину
    /// лога; None для in-memory стора.
    pub fn compact_log(&self) -> Result<Option<u64>> {
        if self.is_read_only() {
            return Err(anyhow!("cannot compact a store opened read-only"));
        }
        let mut guard = self.log.lock().unwrap();
        let log = match guard.as_mut() {
            Some(l) => l,
            None => return Ok(None),
        };
        let before = log.len_bytes();

        let (seq, ops) = {
            let st = self.state.read().unwrap();
            let seq = st.seq();
            let mut ops = Vec::new();
            for table in st.table_ids() {
                for (key, value) in st.table_entries(&table, seq) {
                    ops.push(WriteOp::Put {
                        table: table.clone(),
                        key,
                        value,
                    });
                }
            }
            (seq, ops)
        };

        log.rewrite(seq, &ops)
            .with_context(|| format!("compact batch log {}", log.path().display()))?;
        record_log_compaction();
        info!(
            "batch log compacted: {} -> {} bytes ({} live entries at seq {})",
            before,
            log.len_bytes(),
            ops.len(),
            seq
        );
        Ok(Some(log.len_bytes()))
    }

    /// Живые пары таблицы внутри range. `at = None` — последнее состояние.
    pub fn scan_table(
        &self,
        table: &[u8],
        range: &KeyRange,
        at: Option<Seq>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let st = self.state.read().unwrap();
        let at = at.unwrap_or_else(|| st.seq());
        st.table_entries(table, at)
            .into_iter()
            .filter(|(k, _)| range.contains(k))
            .collect()
    }

    /// Идентификаторы таблиц, в которых есть хотя бы одна версия.
    pub fn tables(&self) -> Vec<Vec<u8>> {
        self.state.read().unwrap().table_ids()
    }

    pub fn stats(&self) -> StoreStats {
        let log_bytes = self
            .log
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.len_bytes())
            .or(self.read_only);
        let st = self.state.read().unwrap();
        let (keys, versions) = st.counts();
        StoreStats {
            seq: st.seq(),
            tables: st.table_ids().len(),
            keys,
            versions,
            pinned_snapshots: st.pinned_count(),
            log_bytes,
        }
    }
}

fn replay(records: &[LogRecord]) -> Versions {
    let mut versions = Versions::new();
    for rec in records {
        versions.apply_at(rec.seq, &rec.ops);
    }
    versions
}

impl Engine for Store {
    fn latest_seq(&self) -> Seq {
        self.state.read().unwrap().seq()
    }

    fn pin_snapshot(&self) -> Seq {
        self.state.write().unwrap().pin()
    }

    fn release_snapshot(&self, seq: Seq) {
        let pruned = self.state.write().unwrap().release_pin(seq);
        if pruned > 0 {
            debug!("snapshot seq={} released, {} versions pruned", seq, pruned);
        }
        record_gc_pruned(pruned);
    }

    fn get(&self, table: &[u8], key: &[u8], at: Option<Seq>) -> Result<Option<Vec<u8>>> {
        let st = self.state.read().unwrap();
        let at = at.unwrap_or_else(|| st.seq());
        Ok(st.get(table, key, at))
    }

    fn seek(
        &self,
        table: &[u8],
        range: &KeyRange,
        after: Option<&[u8]>,
        at: Seq,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.state.read().unwrap().seek(table, range, after, at))
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<Seq> {
        if self.is_read_only() {
            return Err(anyhow!("store opened read-only"));
        }
        let mut log = self.log.lock().unwrap();
        if ops.is_empty() {
            return Ok(self.latest_seq());
        }
        let seq = self.latest_seq() + 1;
        if let Some(l) = log.as_mut() {
            l.append(seq, ops)?;
        }
        let pruned = self.state.write().unwrap().apply_at(seq, ops);
        drop(log);

        record_commit(ops.len());
        record_gc_pruned(pruned);
        debug!("commit seq={} ops={} pruned={}", seq, ops.len(), pruned);
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(k: &[u8], v: &[u8]) -> WriteOp {
        WriteOp::Put {
            table: vec![0x40],
            key: k.to_vec(),
            value: v.to_vec(),
        }
    }

    #[test]
    fn empty_batch_commits_nothing() -> Result<()> {
        let s = Store::in_memory();
        assert_eq!(s.apply(&[])?, 0);
        assert_eq!(s.apply(&[put(b"a", b"1")])?, 1);
        assert_eq!(s.apply(&[])?, 1);
        Ok(())
    }

    #[test]
    fn in_memory_store_has_no_log() -> Result<()> {
        let s = Store::in_memory();
        s.apply(&[put(b"a", b"1"), put(b"b", b"")])?;
        assert_eq!(s.compact_log()?, None);
        let st = s.stats();
        assert_eq!(st.keys, 2);
        assert_eq!(st.log_bytes, None);
        assert_eq!(s.get(&[0x40], b"b", None)?, Some(Vec::new()));
        Ok(())
    }
}
