use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use SimpleDB::{
    error_kind, Engine, ErrorKind, Server, ServerConfig, Session, SessionLimits, SessionStats,
    Store,
};

const T: &[u8] = &[0x53];

/// Ждать условие не дольше `limit`.
fn wait_until<F: FnMut() -> bool>(limit: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn disconnect_reclaims_snapshots_and_batches() -> Result<()> {
    let store = Arc::new(Store::in_memory());
    let server = Server::new(ServerConfig::default(), store.clone());

    {
        let c = server.connect_local()?;
        c.use_snapshot()?;
        let snap = c.use_snapshot()?;
        c.new_iterator(snap, T, None, None)?;
        let wb = c.create_write_batch()?;
        c.put(wb, T, b"never", b"committed")?;
        assert_eq!(store.stats().pinned_snapshots, 2);
    }

    assert!(
        wait_until(Duration::from_secs(5), || store.stats().pinned_snapshots == 0),
        "pins are still held after disconnect: {}",
        store.stats()
    );
    // Брошенный батч откатан.
    assert_eq!(store.get(T, b"never", None)?, None);
    Ok(())
}

#[test]
fn handles_are_private_to_a_session() -> Result<()> {
    let server = Server::new(ServerConfig::default(), Arc::new(Store::in_memory()));
    let a = server.connect_local()?;
    let b = server.connect_local()?;

    let snap = a.use_snapshot()?;
    let wb = a.create_write_batch()?;

    let err = b.get_value(T, b"k", Some(snap)).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    let err = b.put(wb, T, b"k", b"v").unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    let err = b.dispose_snapshot(snap).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));

    // А данные общие: коммит сессии A виден сессии B.
    a.put(wb, T, b"k", b"v")?;
    a.write(wb)?;
    assert_eq!(b.get_value(T, b"k", None)?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn snapshot_limit_is_resource_exhausted() -> Result<()> {
    let cfg = ServerConfig::default().with_max_snapshots(3);
    let server = Server::new(cfg, Arc::new(Store::in_memory()));
    let c = server.connect_local()?;
    let first = c.use_snapshot()?;
    c.use_snapshot()?;
    c.use_snapshot()?;
    let err = c.use_snapshot().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::ResourceExhausted));

    // Лимит на сессию: соседняя сессия не затронута.
    let other = server.connect_local()?;
    other.use_snapshot()?;

    c.dispose_snapshot(first)?;
    c.use_snapshot()?;
    Ok(())
}

#[test]
fn idle_session_is_closed_and_reclaimed() -> Result<()> {
    let store = Arc::new(Store::in_memory());
    let cfg = ServerConfig::default().with_session_idle_timeout_ms(150);
    let server = Server::new(cfg, store.clone());
    let c = server
        .connect_local()?
        .with_timeout(Duration::from_secs(1));
    c.use_snapshot()?;
    assert_eq!(store.stats().pinned_snapshots, 1);

    assert!(wait_until(Duration::from_secs(5), || {
        store.stats().pinned_snapshots == 0
    }));
    assert!(c.use_snapshot().is_err());
    Ok(())
}

#[test]
fn session_close_is_idempotent_and_counts() -> Result<()> {
    let store = Arc::new(Store::in_memory());
    let s = Session::new(7, store.clone(), SessionLimits::default());
    let snap = s.open_snapshot()?;
    s.new_iterator(snap, T, b"", None)?;
    s.new_iterator(snap, T, b"", None)?;
    s.open_batch()?;
    assert_eq!(
        s.stats(),
        SessionStats {
            snapshots: 1,
            batches: 1,
            iterators: 2
        }
    );

    let reclaimed = s.close();
    assert_eq!(reclaimed.iterators, 2);
    assert_eq!(store.stats().pinned_snapshots, 0);
    assert_eq!(s.close(), SessionStats::default());

    drop(s);
    assert_eq!(store.stats().pinned_snapshots, 0);
    Ok(())
}
