//! Request builders and result parsers for every verb.
//!
//! Builders принимают id вызывающей стороны; пустой id = fire-and-forget.
//! Parsers работают по ParamBag из успешного ответа.

use super::envelope::{ParamBag, Request};
use crate::consts::*;
use crate::error::{ProtoError, ProtoResult};

pub fn use_snapshot(id: &str) -> Request {
    Request::new(M_USE_SNAPSHOT, id, ParamBag::new())
}

pub fn dispose_snapshot(id: &str, snapid: u64) -> Request {
    Request::new(M_DISPOSE_SNAPSHOT, id, ParamBag::new().snapid(snapid))
}

pub fn create_write_batch(id: &str) -> Request {
    Request::new(M_CREATE_WRITE_BATCH, id, ParamBag::new())
}

pub fn dispose_write_batch(id: &str, wbid: u64) -> Request {
    Request::new(M_DISPOSE_WRITE_BATCH, id, ParamBag::new().wbid(wbid))
}

pub fn put(id: &str, wbid: u64, table: &[u8], key: &[u8], value: &[u8]) -> Request {
    Request::new(
        M_PUT,
        id,
        ParamBag::new().wbid(wbid).tableid(table).key(key).value(value),
    )
}

pub fn delete(id: &str, wbid: u64, table: &[u8], key: &[u8]) -> Request {
    Request::new(M_DELETE, id, ParamBag::new().wbid(wbid).tableid(table).key(key))
}

pub fn write(id: &str, wbid: u64) -> Request {
    Request::new(M_WRITE, id, ParamBag::new().wbid(wbid))
}

/// begin едет в `key`, end — в `value` (так их раскладывал SDK).
pub fn new_iterator(
    id: &str,
    snapid: u64,
    table: &[u8],
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Request {
    let mut bag = ParamBag::new().snapid(snapid).tableid(table);
    if let Some(b) = begin {
        bag = bag.key(b);
    }
    if let Some(e) = end {
        bag = bag.value(e);
    }
    Request::new(M_NEW_ITERATOR, id, bag)
}

pub fn iterator_current(id: &str, itid: u64) -> Request {
    Request::new(M_ITERATOR_CURRENT, id, ParamBag::new().itid(itid))
}

pub fn iterator_next(id: &str, itid: u64) -> Request {
    Request::new(M_ITERATOR_NEXT, id, ParamBag::new().itid(itid))
}

pub fn iterator_seek_to_first(id: &str, itid: u64) -> Request {
    Request::new(M_ITERATOR_SEEK_TO_FIRST, id, ParamBag::new().itid(itid))
}

pub fn iterator_reset(id: &str, itid: u64) -> Request {
    Request::new(M_ITERATOR_RESET, id, ParamBag::new().itid(itid))
}

pub fn iterator_dispose(id: &str, itid: u64) -> Request {
    Request::new(M_ITERATOR_DISPOSE, id, ParamBag::new().itid(itid))
}

/// snapid = Some(nonzero) → `_db.snapshot.getvalue`, иначе `_db.getvalue` (последнее состояние).
pub fn get_value(id: &str, table: &[u8], key: &[u8], snapid: Option<u64>) -> Request {
    let bag = ParamBag::new().tableid(table).key(key);
    match snapid {
        Some(s) if s != 0 => Request::new(M_SNAPSHOT_GET_VALUE, id, bag.snapid(s)),
        _ => Request::new(M_GET_VALUE, id, bag),
    }
}

// ---------------- parsers ----------------

pub fn parse_snapid(bag: &ParamBag) -> ProtoResult<u64> {
    non_zero(bag.snapid, "snapid")
}

pub fn parse_wbid(bag: &ParamBag) -> ProtoResult<u64> {
    non_zero(bag.wbid, "wbid")
}

pub fn parse_itid(bag: &ParamBag) -> ProtoResult<u64> {
    non_zero(bag.itid, "itid")
}

fn non_zero(h: u64, what: &str) -> ProtoResult<u64> {
    if h == 0 {
        Err(ProtoError::invalid_argument(format!("result carries no {}", what)))
    } else {
        Ok(h)
    }
}

pub fn parse_bool(bag: &ParamBag) -> bool {
    bag.result_flag()
}

/// Point lookup: `Some(value)` (возможно пустое) или `None` = not found.
pub fn parse_lookup(bag: &ParamBag) -> Option<Vec<u8>> {
    if bag.result_flag() {
        Some(bag.value.clone().unwrap_or_default())
    } else {
        None
    }
}

/// Iterator current: (key, value).
pub fn parse_current(bag: &ParamBag) -> (Vec<u8>, Vec<u8>) {
    (bag.key.clone(), bag.value.clone().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_value_picks_verb_by_snapid() {
        assert_eq!(get_value("1", b"t", b"k", None).method, M_GET_VALUE);
        assert_eq!(get_value("1", b"t", b"k", Some(0)).method, M_GET_VALUE);
        let r = get_value("1", b"t", b"k", Some(9));
        assert_eq!(r.method, M_SNAPSHOT_GET_VALUE);
        assert_eq!(r.params.snapid, 9);
    }

    #[test]
    fn iterator_range_rides_in_key_and_value() {
        let r = new_iterator("", 3, &[0x44], Some(&b"a"[..]), None);
        assert_eq!(r.params.key, b"a".to_vec());
        assert_eq!(r.params.value, None);
        assert!(r.id.is_empty());
    }

    #[test]
    fn lookup_not_found_vs_empty() {
        assert_eq!(parse_lookup(&ParamBag::new().result(false)), None);
        assert_eq!(
            parse_lookup(&ParamBag::new().result(true).value(b"")),
            Some(Vec::new())
        );
    }
}
