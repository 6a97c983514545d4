//! Exclusive directory lock for a durable store.
//!
//! fs2 advisory lock on <root>/LOCK: один процесс владеет batch-логом каталога.
//! Второй Store::open на тот же каталог (сервер + офлайн CLI) получает ошибку
//! сразу, а не ждёт. Офлайн-чтение берёт shared-лок и LOCK не создаёт.
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;

#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Try to take the exclusive lock. Returns Err if another holder exists.
pub fn try_acquire_exclusive_lock(root: &Path) -> Result<LockGuard> {
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "store directory is in use (try_lock_exclusive failed: {})",
            path.display()
        )
    })?;
    Ok(LockGuard { file, path })
}

/// Shared lock for a read-only open. LOCK не создаётся: если файла нет, каталог
/// никто не открывал на запись, и блокировать нечего (Ok(None)).
pub fn try_acquire_shared_lock(root: &Path) -> Result<Option<LockGuard>> {
    let path = root.join(LOCK_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .read(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    file.try_lock_shared().with_context(|| {
        format!(
            "store directory is in use (try_lock_shared failed: {})",
            path.display()
        )
    })?;
    Ok(Some(LockGuard { file, path }))
}
