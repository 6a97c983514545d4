//! Закрытый словарь методов (PROTOCOL_VERSION = 1).

use std::fmt;
use std::str::FromStr;

use crate::consts::*;
use crate::error::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    UseSnapshot,
    DisposeSnapshot,
    CreateWriteBatch,
    DisposeWriteBatch,
    Put,
    Delete,
    Write,
    NewIterator,
    IteratorCurrent,
    IteratorNext,
    IteratorSeekToFirst,
    IteratorReset,
    IteratorDispose,
    SnapshotGetValue,
    GetValue,
}

impl Method {
    pub const ALL: [Method; 15] = [
        Method::UseSnapshot,
        Method::DisposeSnapshot,
        Method::CreateWriteBatch,
        Method::DisposeWriteBatch,
        Method::Put,
        Method::Delete,
        Method::Write,
        Method::NewIterator,
        Method::IteratorCurrent,
        Method::IteratorNext,
        Method::IteratorSeekToFirst,
        Method::IteratorReset,
        Method::IteratorDispose,
        Method::SnapshotGetValue,
        Method::GetValue,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::UseSnapshot => M_USE_SNAPSHOT,
            Method::DisposeSnapshot => M_DISPOSE_SNAPSHOT,
            Method::CreateWriteBatch => M_CREATE_WRITE_BATCH,
            Method::DisposeWriteBatch => M_DISPOSE_WRITE_BATCH,
            Method::Put => M_PUT,
            Method::Delete => M_DELETE,
            Method::Write => M_WRITE,
            Method::NewIterator => M_NEW_ITERATOR,
            Method::IteratorCurrent => M_ITERATOR_CURRENT,
            Method::IteratorNext => M_ITERATOR_NEXT,
            Method::IteratorSeekToFirst => M_ITERATOR_SEEK_TO_FIRST,
            Method::IteratorReset => M_ITERATOR_RESET,
            Method::IteratorDispose => M_ITERATOR_DISPOSE,
            Method::SnapshotGetValue => M_SNAPSHOT_GET_VALUE,
            Method::GetValue => M_GET_VALUE,
        }
    }
}

impl FromStr for Method {
    type Err = ProtoError;

    /// Имена сравниваются точно (регистр важен: `_db.CreateWriteBatch`, `_db.disposeSnapshot`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProtoError::invalid_argument(format!("unknown method '{}'", s)))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn every_method_parses_back() {
        for m in Method::ALL {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_or_miscased_method_is_invalid_argument() {
        let e = "_db.createwritebatch".parse::<Method>().unwrap_err();
        assert_eq!(e.kind, ErrorKind::InvalidArgument);
        assert!("_db.snapshot.scan".parse::<Method>().is_err());
    }
}
