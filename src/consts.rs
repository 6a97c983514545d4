//! Общие константы: словарь методов протокола, префиксы таблиц, лимиты и формат batch-лога.

// -------- Protocol --------

/// Версия закрытого словаря методов. Любое изменение набора методов — новая версия.
pub const PROTOCOL_VERSION: u32 = 1;

pub const M_USE_SNAPSHOT: &str = "_db.usesnapshot";
pub const M_DISPOSE_SNAPSHOT: &str = "_db.disposeSnapshot";
pub const M_CREATE_WRITE_BATCH: &str = "_db.CreateWriteBatch";
pub const M_DISPOSE_WRITE_BATCH: &str = "_db.disposeWriteBatch";
pub const M_PUT: &str = "_db.put";
pub const M_DELETE: &str = "_db.delete";
pub const M_WRITE: &str = "_db.write";
pub const M_NEW_ITERATOR: &str = "_db.snapshot.newiterator";
pub const M_ITERATOR_CURRENT: &str = "_db.iterator.current";
pub const M_ITERATOR_NEXT: &str = "_db.iterator.next";
pub const M_ITERATOR_SEEK_TO_FIRST: &str = "_db.iterator.seektofirst";
pub const M_ITERATOR_RESET: &str = "_db.iterator.reset";
pub const M_ITERATOR_DISPOSE: &str = "_db.iterator.dispose";
pub const M_SNAPSHOT_GET_VALUE: &str = "_db.snapshot.getvalue";
pub const M_GET_VALUE: &str = "_db.getvalue";

// -------- Table prefixes --------
// Внешняя конвенция вызывающей стороны. Протокол трактует tableid как непрозрачный
// ключ партиции и ни одно значение не обрабатывает особым образом.

pub const DATA_BLOCK: u8 = 0x01;
pub const DATA_TRANSACTION: u8 = 0x02;
pub const DATA_APPLICATION_LOG: u8 = 0x03;

pub const ST_ACCOUNT: u8 = 0x40;
pub const ST_COIN: u8 = 0x44;
pub const ST_SPENT_COIN: u8 = 0x45;
pub const ST_VALIDATOR: u8 = 0x48;
pub const ST_ASSET: u8 = 0x4c;
pub const ST_CONTRACT: u8 = 0x50;
pub const ST_STORAGE: u8 = 0x70;

pub const IX_HEADER_HASH_LIST: u8 = 0x80;
pub const IX_VALIDATORS_COUNT: u8 = 0x90;
pub const IX_CURRENT_BLOCK: u8 = 0xc0;
pub const IX_CURRENT_HEADER: u8 = 0xc1;

pub const SYS_VERSION: u8 = 0xf0;
pub const SYS_DEFAULT_TABLE_ID: u8 = 0xf1;

// -------- Limits (defaults) --------

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 20080;
pub const DEFAULT_MAX_SNAPSHOTS: usize = 1024;
pub const DEFAULT_MAX_BATCHES: usize = 1024;
pub const DEFAULT_MAX_ITERATORS: usize = 4096;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SESSION_IDLE_MS: u64 = 300_000;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// -------- Batch log --------
// Файл: <root>/batches.log
// header(16) = [magic8 "SDBLOG01"][reserved u64]
// record     = [seq u64][len u32][crc32 u32][payload len]
// CRC32 считается по seq + len + payload.

pub const LOG_FILE: &str = "batches.log";
pub const LOG_MAGIC: &[u8; 8] = b"SDBLOG01";
pub const LOG_HDR_SIZE: usize = 16;
pub const LOG_REC_HDR_SIZE: usize = 16;

pub const LOG_REC_OFF_SEQ: usize = 0;
pub const LOG_REC_OFF_LEN: usize = 8;
pub const LOG_REC_OFF_CRC32: usize = 12;

// Операции внутри payload записи батча
pub const LOG_OP_PUT: u8 = 1;
pub const LOG_OP_DELETE: u8 = 2;

pub const LOCK_FILE: &str = "LOCK";
