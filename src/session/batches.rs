//! Write-batch manager.
//!
//! Batch — накопленные операции без какой-либо видимости до Write. Операции над
//! одним wbid сериализуются мьютексом батча; retired защищает от Put, который
//! взял Arc до того, как Write/Dispose убрал хэндл из таблицы.

use log::{debug, warn};
use std::sync::{Arc, Mutex};

use super::Session;
use crate::engine::WriteOp;
use crate::error::{ProtoError, ProtoResult};
use crate::metrics::{
    record_batch_abandoned, record_batch_committed, record_batch_disposed, record_batch_open,
};

#[derive(Debug, Default)]
pub struct BatchState {
    ops: Vec<WriteOp>,
    retired: bool,
}

pub type BatchEntry = Arc<Mutex<BatchState>>;

fn validate_key(tableid: &[u8], key: &[u8]) -> ProtoResult<()> {
    if tableid.is_empty() {
        return Err(ProtoError::invalid_argument("tableid must not be empty"));
    }
    if key.is_empty() {
        return Err(ProtoError::invalid_argument("key must not be empty"));
    }
    Ok(())
}

impl Session {
    /// `_db.CreateWriteBatch`
    pub fn open_batch(&self) -> ProtoResult<u64> {
        let mut batches = self.batches.lock().unwrap();
        self.ensure_open()?;
        let h = batches
            .insert(Arc::new(Mutex::new(BatchState::default())))
            .ok_or_else(|| ProtoError::exhausted("write batches", batches.limit()))?;
        record_batch_open();
        debug!("session {}: write batch {}", self.id, h);
        Ok(h)
    }

    fn batch(&self, wbid: u64) -> ProtoResult<BatchEntry> {
        self.batches
            .lock()
            .unwrap()
            .get(wbid)
            .cloned()
            .ok_or_else(|| ProtoError::invalid_handle("wbid", wbid))
    }

    fn stage(&self, wbid: u64, op: WriteOp) -> ProtoResult<()> {
        let entry = self.batch(wbid)?;
        let mut st = entry.lock().unwrap();
        if st.retired {
            return Err(ProtoError::invalid_handle("wbid", wbid));
        }
        st.ops.push(op);
        Ok(())
    }

    /// `_db.put`: value может быть пустым.
    pub fn batch_put(&self, wbid: u64, tableid: &[u8], key: &[u8], value: &[u8]) -> ProtoResult<()> {
        validate_key(tableid, key)?;
        self.stage(
            wbid,
            WriteOp::Put {
                table: tableid.to_vec(),
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )
    }

    /// `_db.delete`
    pub fn batch_delete(&self, wbid: u64, tableid: &[u8], key: &[u8]) -> ProtoResult<()> {
        validate_key(tableid, key)?;
        self.stage(
            wbid,
            WriteOp::Delete {
                table: tableid.to_vec(),
                key: key.to_vec(),
            },
        )
    }

    /// Снять батч с учёта: пометить retired и убрать хэндл. Возвращает ops.
    fn retire(&self, wbid: u64) -> ProtoResult<Vec<WriteOp>> {
        let entry = self.batch(wbid)?;
        let mut st = entry.lock().unwrap();
        if st.retired {
            return Err(ProtoError::invalid_handle("wbid", wbid));
        }
        st.retired = true;
        self.batches.lock().unwrap().remove(wbid);
        Ok(std::mem::take(&mut st.ops))
    }

    /// `_db.write`: один атомарный коммит. Хэндл уходит и при успехе, и при ошибке.
    pub fn batch_write(&self, wbid: u64) -> ProtoResult<()> {
        let ops = self.retire(wbid)?;
        match self.engine.apply(&ops) {
            Ok(seq) => {
                record_batch_committed();
                debug!(
                    "session {}: batch {} committed at seq {} ({} ops)",
                    self.id,
                    wbid,
                    seq,
                    ops.len()
                );
                Ok(())
            }
            Err(e) => {
                record_batch_abandoned();
                warn!("session {}: batch {} failed to commit: {:#}", self.id, wbid, e);
                Err(ProtoError::engine(e))
            }
        }
    }

    /// `_db.disposeWriteBatch`: откат без коммита.
    pub fn dispose_batch(&self, wbid: u64) -> ProtoResult<()> {
        let ops = self.retire(wbid)?;
        record_batch_disposed();
        debug!(
            "session {}: batch {} disposed ({} staged ops dropped)",
            self.id,
            wbid,
            ops.len()
        );
        Ok(())
    }

    /// Батчи, так и не дошедшие до Write, при закрытии сессии.
    pub(crate) fn abandon_batches(&self) -> usize {
        let abandoned = self.batches.lock().unwrap().drain();
        let mut staged = 0usize;
        for b in &abandoned {
            let mut st = b.lock().unwrap();
            st.retired = true;
            staged += st.ops.len();
            st.ops.clear();
            record_batch_abandoned();
        }
        if !abandoned.is_empty() {
            warn!(
                "session {}: {} uncommitted write batches rolled back ({} staged ops)",
                self.id,
                abandoned.len(),
                staged
            );
        }
        abandoned.len()
    }
}
