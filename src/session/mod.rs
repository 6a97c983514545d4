//! session — серверное состояние одного соединения.
//!
//! Подмодули:
//! - handles.rs   — generational HandleTable<T>;
//! - snapshots.rs — usesnapshot / disposeSnapshot (транзитивно закрывает итераторы);
//! - batches.rs   — CreateWriteBatch / put / delete / write / disposeWriteBatch;
//! - iterators.rs — newiterator / seektofirst / next / current / reset / dispose;
//! - lookup.rs    — getvalue / snapshot.getvalue.
//!
//! Хэндлы живут в таблицах сессии и из другой сессии не видны. Закрытие сессии
//! (disconnect, idle timeout, Drop) освобождает все снапшоты и итераторы и
//! откатывает незакоммиченные батчи.

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::Engine;
use crate::error::{ErrorKind, ProtoError, ProtoResult};
use crate::metrics::{record_request, record_session_close, record_session_open};
use crate::protocol::{Method, ParamBag, Request, Response};

pub mod batches;
pub mod handles;
pub mod iterators;
pub mod lookup;
pub mod snapshots;

use batches::BatchEntry;
use handles::HandleTable;
use iterators::IteratorEntry;
use snapshots::SnapshotEntry;

/// Per-session handle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_snapshots: usize,
    pub max_batches: usize,
    pub max_iterators: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_snapshots: crate::consts::DEFAULT_MAX_SNAPSHOTS,
            max_batches: crate::consts::DEFAULT_MAX_BATCHES,
            max_iterators: crate::consts::DEFAULT_MAX_ITERATORS,
        }
    }
}

/// Сколько хэндлов открыто сейчас.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub snapshots: usize,
    pub batches: usize,
    pub iterators: usize,
}

pub struct Session {
    id: u64,
    engine: Arc<dyn Engine>,
    snapshots: Mutex<HandleTable<Arc<SnapshotEntry>>>,
    batches: Mutex<HandleTable<BatchEntry>>,
    iterators: Mutex<HandleTable<Arc<IteratorEntry>>>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: u64, engine: Arc<dyn Engine>, limits: SessionLimits) -> Self {
        record_session_open();
        debug!("session {} opened", id);
        Self {
            id,
            engine,
            snapshots: Mutex::new(HandleTable::with_limit(limits.max_snapshots)),
            batches: Mutex::new(HandleTable::with_limit(limits.max_batches)),
            iterators: Mutex::new(HandleTable::with_limit(limits.max_iterators)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            snapshots: self.snapshots.lock().unwrap().len(),
            batches: self.batches.lock().unwrap().len(),
            iterators: self.iterators.lock().unwrap().len(),
        }
    }

    /// Выполнить один запрос. Ошибки не выходят за пределы ответа: чужие хэндлы
    /// и другие запросы не затрагиваются.
    pub fn dispatch(&self, req: &Request) -> Response {
        let result = req
            .method
            .parse::<Method>()
            .and_then(|m| self.execute(m, &req.params));
        record_request(result.as_ref().err().map(|e| e.kind));
        match &result {
            Ok(_) => debug!("session {}: {} id='{}' ok", self.id, req.method, req.id),
            Err(e) => debug!("session {}: {} id='{}' -> {}", self.id, req.method, req.id, e),
        }
        Response::from_result(req.id.clone(), result)
    }

    pub fn execute(&self, method: Method, p: &ParamBag) -> ProtoResult<ParamBag> {
        self.ensure_open()?;
        let empty = ParamBag::new;
        match method {
            Method::UseSnapshot => Ok(empty().snapid(self.open_snapshot()?)),
            Method::DisposeSnapshot => self.dispose_snapshot(p.snapid).map(|_| empty()),
            Method::CreateWriteBatch => Ok(empty().wbid(self.open_batch()?)),
            Method::DisposeWriteBatch => self.dispose_batch(p.wbid).map(|_| empty()),
            Method::Put => {
                let value = p.value.as_deref().unwrap_or(&[]);
                self.batch_put(p.wbid, &p.tableid, &p.key, value)
                    .map(|_| empty())
            }
            Method::Delete => self
                .batch_delete(p.wbid, &p.tableid, &p.key)
                .map(|_| empty()),
            Method::Write => self.batch_write(p.wbid).map(|_| empty()),
            Method::NewIterator => {
                let itid = self.new_iterator(p.snapid, &p.tableid, &p.key, p.value.as_deref())?;
                Ok(empty().itid(itid))
            }
            Method::IteratorCurrent => {
                let (key, value) = self.iterator_current(p.itid)?;
                Ok(empty().key(&key).value(&value))
            }
            Method::IteratorNext => Ok(empty().result(self.iterator_next(p.itid)?)),
            Method::IteratorSeekToFirst => {
                Ok(empty().result(self.iterator_seek_to_first(p.itid)?))
            }
            Method::IteratorReset => Ok(empty().result(self.iterator_reset(p.itid)?)),
            Method::IteratorDispose => self.dispose_iterator(p.itid).map(|_| empty()),
            Method::SnapshotGetValue | Method::GetValue => {
                match self.get_value(&p.tableid, &p.key, p.snapid)? {
                    Some(v) => Ok(empty().value(&v).result(true)),
                    None => Ok(empty().result(false)),
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Закрытая сессия новых хэндлов не выдаёт. В open_* проверяется повторно под
    /// замком таблицы: close() ставит флаг до того, как берёт замки.
    pub(crate) fn ensure_open(&self) -> ProtoResult<()> {
        if self.is_closed() {
            return Err(ProtoError::new(ErrorKind::InvalidHandle, "session closed"));
        }
        Ok(())
    }

    /// Освободить всё, что держит сессия. Повторный вызов ничего не делает.
    pub fn close(&self) -> SessionStats {
        if self.closed.swap(true, Ordering::AcqRel) {
            return SessionStats::default();
        }
        let iterators = self.iterators.lock().unwrap().drain().len();
        let snapshots = self.snapshots.lock().unwrap().drain().len();
        let batches = self.abandon_batches();
        record_session_close();
        let reclaimed = SessionStats {
            snapshots,
            batches,
            iterators,
        };
        info!(
            "session {} closed: reclaimed {} snapshots, {} iterators, {} batches",
            self.id, reclaimed.snapshots, reclaimed.iterators, reclaimed.batches
        );
        reclaimed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
