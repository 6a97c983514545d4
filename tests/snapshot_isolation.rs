use anyhow::Result;
use std::sync::Arc;

use SimpleDB::consts::ST_ACCOUNT;
use SimpleDB::{error_kind, Client, ErrorKind, Server, ServerConfig, Store};

const T: &[u8] = &[ST_ACCOUNT];

fn local_client() -> Result<(Server, Client)> {
    let server = Server::new(ServerConfig::default(), Arc::new(Store::in_memory()));
    let client = server.connect_local()?;
    Ok((server, client))
}

fn commit(c: &Client, puts: &[(&str, &str)], dels: &[&str]) -> Result<()> {
    let wb = c.create_write_batch()?;
    for (k, v) in puts {
        c.put(wb, T, k.as_bytes(), v.as_bytes())?;
    }
    for k in dels {
        c.delete(wb, T, k.as_bytes())?;
    }
    c.write(wb)
}

/// Снапшот фиксирует состояние на момент открытия; последующие коммиты видны
/// только при чтении без снапшота.
#[test]
fn snapshot_sees_state_at_open() -> Result<()> {
    let (_server, c) = local_client()?;
    commit(&c, &[("a", "1"), ("b", "2")], &[])?;

    let snap = c.use_snapshot()?;
    commit(&c, &[("a", "10"), ("c", "3")], &["b"])?;

    assert_eq!(c.get_value(T, b"a", Some(snap))?, Some(b"1".to_vec()));
    assert_eq!(c.get_value(T, b"b", Some(snap))?, Some(b"2".to_vec()));
    assert_eq!(c.get_value(T, b"c", Some(snap))?, None);

    assert_eq!(c.get_value(T, b"a", None)?, Some(b"10".to_vec()));
    assert_eq!(c.get_value(T, b"b", None)?, None);
    assert_eq!(c.get_value(T, b"c", None)?, Some(b"3".to_vec()));

    c.dispose_snapshot(snap)?;
    Ok(())
}

/// Два снапшота на разных seq не мешают друг другу.
#[test]
fn snapshots_at_different_points() -> Result<()> {
    let (_server, c) = local_client()?;
    let s0 = c.use_snapshot()?;
    commit(&c, &[("k", "v1")], &[])?;
    let s1 = c.use_snapshot()?;
    commit(&c, &[("k", "v2")], &[])?;
    let s2 = c.use_snapshot()?;
    assert_ne!(s0, s1);

    assert_eq!(c.get_value(T, b"k", Some(s0))?, None);
    assert_eq!(c.get_value(T, b"k", Some(s1))?, Some(b"v1".to_vec()));
    assert_eq!(c.get_value(T, b"k", Some(s2))?, Some(b"v2".to_vec()));

    // Освобождение среднего снапшота не трогает соседей.
    c.dispose_snapshot(s1)?;
    assert_eq!(c.get_value(T, b"k", Some(s0))?, None);
    assert_eq!(c.get_value(T, b"k", Some(s2))?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn disposed_snapshot_is_invalid_handle() -> Result<()> {
    let (_server, c) = local_client()?;
    let snap = c.use_snapshot()?;
    c.dispose_snapshot(snap)?;

    let err = c.get_value(T, b"a", Some(snap)).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));

    let err = c.dispose_snapshot(snap).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));

    // Новый снапшот в том же слоте получает другой хэндл.
    let again = c.use_snapshot()?;
    assert_ne!(again, snap);
    let err = c.get_value(T, b"a", Some(snap)).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    Ok(())
}

/// dispose снапшота закрывает и его итераторы.
#[test]
fn dispose_snapshot_invalidates_its_iterators() -> Result<()> {
    let (_server, c) = local_client()?;
    commit(&c, &[("a", "1")], &[])?;
    let keep = c.use_snapshot()?;
    let gone = c.use_snapshot()?;
    let it_keep = c.new_iterator(keep, T, None, None)?;
    let it_gone = c.new_iterator(gone, T, None, None)?;

    c.dispose_snapshot(gone)?;

    let err = c.iterator_next(it_gone).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    assert!(c.iterator_next(it_keep)?);
    assert_eq!(c.iterator_current(it_keep)?, (b"a".to_vec(), b"1".to_vec()));
    Ok(())
}

#[test]
fn unknown_snapshot_handle_is_rejected() -> Result<()> {
    let (_server, c) = local_client()?;
    let err = c.get_value(T, b"a", Some(0xdead_beef)).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    let err = c.new_iterator(12345, T, None, None).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    Ok(())
}
