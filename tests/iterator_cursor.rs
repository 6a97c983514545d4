use anyhow::Result;
use std::sync::Arc;

use SimpleDB::{error_kind, Client, ErrorKind, Server, ServerConfig, Store};

const T: &[u8] = &[0x49];

fn local_client() -> Result<(Server, Client)> {
    let server = Server::new(ServerConfig::default(), Arc::new(Store::in_memory()));
    let client = server.connect_local()?;
    Ok((server, client))
}

fn fill(c: &Client, table: &[u8], keys: &[&str]) -> Result<()> {
    let wb = c.create_write_batch()?;
    for k in keys {
        c.put(wb, table, k.as_bytes(), format!("v-{}", k).as_bytes())?;
    }
    c.write(wb)
}

/// Прочитать всё от seektofirst до конца.
fn collect(c: &Client, itid: u64) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut ok = c.iterator_seek_to_first(itid)?;
    while ok {
        let (k, _) = c.iterator_current(itid)?;
        out.push(String::from_utf8(k)?);
        ok = c.iterator_next(itid)?;
    }
    Ok(out)
}

#[test]
fn iterates_in_key_order() -> Result<()> {
    let (_server, c) = local_client()?;
    fill(&c, T, &["delta", "alpha", "charlie", "bravo"])?;
    fill(&c, &[0x50], &["other"])?;

    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;
    assert_eq!(collect(&c, it)?, vec!["alpha", "bravo", "charlie", "delta"]);

    assert!(c.iterator_seek_to_first(it)?);
    let (k, v) = c.iterator_current(it)?;
    assert_eq!((k, v), (b"alpha".to_vec(), b"v-alpha".to_vec()));
    Ok(())
}

/// Диапазон полуоткрытый: [begin, end).
#[test]
fn range_bounds() -> Result<()> {
    let (_server, c) = local_client()?;
    fill(&c, T, &["a", "b", "c", "d", "e"])?;
    let snap = c.use_snapshot()?;

    let it = c.new_iterator(snap, T, Some(&b"b"[..]), Some(&b"d"[..]))?;
    assert_eq!(collect(&c, it)?, vec!["b", "c"]);

    let it = c.new_iterator(snap, T, Some(&b"c"[..]), None)?;
    assert_eq!(collect(&c, it)?, vec!["c", "d", "e"]);

    let it = c.new_iterator(snap, T, None, Some(&b"b"[..]))?;
    assert_eq!(collect(&c, it)?, vec!["a"]);

    // begin == end — пустой диапазон, но не ошибка.
    let it = c.new_iterator(snap, T, Some(&b"c"[..]), Some(&b"c"[..]))?;
    assert!(!c.iterator_seek_to_first(it)?);

    let err = c
        .new_iterator(snap, T, Some(&b"d"[..]), Some(&b"b"[..]))
        .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
    Ok(())
}

/// Итератор видит данные своего снапшота, а не последующие коммиты.
#[test]
fn iterator_is_bound_to_its_snapshot() -> Result<()> {
    let (_server, c) = local_client()?;
    fill(&c, T, &["a", "b"])?;
    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;

    let wb = c.create_write_batch()?;
    c.delete(wb, T, b"a")?;
    c.put(wb, T, b"c", b"new")?;
    c.write(wb)?;

    assert_eq!(collect(&c, it)?, vec!["a", "b"]);

    let fresh = c.use_snapshot()?;
    let it2 = c.new_iterator(fresh, T, None, None)?;
    assert_eq!(collect(&c, it2)?, vec!["b", "c"]);
    Ok(())
}

#[test]
fn cursor_state_machine() -> Result<()> {
    let (_server, c) = local_client()?;
    fill(&c, T, &["x", "y"])?;
    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;

    // До позиционирования current — InvalidState.
    let err = c.iterator_current(it).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidState));

    // next на свежем итераторе встаёт на первый ключ.
    assert!(c.iterator_next(it)?);
    assert_eq!(c.iterator_current(it)?.0, b"x".to_vec());
    assert!(c.iterator_next(it)?);
    assert_eq!(c.iterator_current(it)?.0, b"y".to_vec());
    assert!(!c.iterator_next(it)?);

    // Исчерпан: next остаётся false, current — InvalidState.
    assert!(!c.iterator_next(it)?);
    let err = c.iterator_current(it).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidState));

    // reset возвращает в начальное состояние.
    assert!(c.iterator_reset(it)?);
    let err = c.iterator_current(it).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidState));
    assert!(c.iterator_next(it)?);
    assert_eq!(c.iterator_current(it)?.0, b"x".to_vec());
    Ok(())
}

#[test]
fn empty_table_iterates_nothing() -> Result<()> {
    let (_server, c) = local_client()?;
    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;
    assert!(!c.iterator_seek_to_first(it)?);
    assert!(!c.iterator_next(it)?);

    let err = c.new_iterator(snap, b"", None, None).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
    Ok(())
}

#[test]
fn disposed_iterator_is_invalid_handle() -> Result<()> {
    let (_server, c) = local_client()?;
    fill(&c, T, &["a"])?;
    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;
    c.iterator_dispose(it)?;

    for err in [
        c.iterator_next(it).map(|_| ()).unwrap_err(),
        c.iterator_seek_to_first(it).map(|_| ()).unwrap_err(),
        c.iterator_current(it).map(|_| ()).unwrap_err(),
        c.iterator_reset(it).map(|_| ()).unwrap_err(),
        c.iterator_dispose(it).unwrap_err(),
    ] {
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidHandle));
    }

    // Снапшот после dispose итератора жив.
    assert_eq!(c.get_value(T, b"a", Some(snap))?, Some(b"v-a".to_vec()));
    Ok(())
}

#[test]
fn iterator_limit_is_resource_exhausted() -> Result<()> {
    let cfg = ServerConfig::default().with_max_iterators(2);
    let server = Server::new(cfg, Arc::new(Store::in_memory()));
    let c = server.connect_local()?;
    let snap = c.use_snapshot()?;
    let a = c.new_iterator(snap, T, None, None)?;
    c.new_iterator(snap, T, None, None)?;
    let err = c.new_iterator(snap, T, None, None).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::ResourceExhausted));
    c.iterator_dispose(a)?;
    c.new_iterator(snap, T, None, None)?;
    Ok(())
}
