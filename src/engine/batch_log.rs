//! engine/batch_log — batch log: одна CRC-запись на закоммиченный батч.
//!
//! Формат (LE):
//! - header(16) = [magic8 "SDBLOG01"][reserved u64]
//! - record     = [seq u64][len u32][crc32 u32][payload len]
//! - payload    = [count u32] затем count раз:
//!   [op u8][table_len u16][table][key_len u32][key][val_len u32][val]   (val только для PUT)
//!
//! CRC32 считается по header записи до поля crc + payload.
//! При открытии лог реплеится; неполный или битый хвост обрезается (это коммит,
//! который не успел стать durable, и клиент его подтверждения не получил).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Seq, WriteOp};
use crate::consts::{
    LOG_FILE, LOG_HDR_SIZE, LOG_MAGIC, LOG_OP_DELETE, LOG_OP_PUT, LOG_REC_HDR_SIZE,
    LOG_REC_OFF_CRC32, LOG_REC_OFF_LEN, LOG_REC_OFF_SEQ,
};
use crate::metrics::{record_log_append, record_log_fsync, record_log_torn_tail};

/// Запись, восстановленная при реплее.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub seq: Seq,
    pub ops: Vec<WriteOp>,
}

pub struct BatchLog {
    path: PathBuf,
    file: File,
    fsync: bool,
    len: u64,
}

impl BatchLog {
    /// Открыть (или создать) лог в root и прочитать все целые записи.
    pub fn open_or_create(root: &Path, fsync: bool) -> Result<(Self, Vec<LogRecord>)> {
        let path = root.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open batch log {}", path.display()))?;

        if file.metadata()?.len() < LOG_HDR_SIZE as u64 {
            debug!("batch log: fresh header at {}", path.display());
            file.set_len(0)?;
            write_file_header(&mut file)?;
            file.sync_all()?;
        }

        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buf)
            .with_context(|| format!("read batch log {}", path.display()))?;

        if &buf[..8] != LOG_MAGIC {
            return Err(anyhow!("bad batch log magic in {}", path.display()));
        }

        let (records, good_len) = parse_records(&buf, &path)?;
        let total = buf.len() as u64;
        if good_len < total {
            warn!(
                "batch log {}: truncating torn tail {} -> {} ({} bytes dropped)",
                path.display(),
                total,
                good_len,
                total - good_len
            );
            file.set_len(good_len)?;
            file.sync_all()?;
            record_log_torn_tail();
        }
        info!(
            "batch log {}: replayed {} records (last seq {})",
            path.display(),
            records.len(),
            records.last().map(|r| r.seq).unwrap_or(0)
        );

        Ok((
            Self {
                path,
                file,
                fsync,
                len: good_len,
            },
            records,
        ))
    }

    /// Прочитать целые записи, ничего не меняя на диске: ни создания файла, ни
    /// обрезки хвоста. Возвращает записи и длину файла.
    pub fn read_only(root: &Path) -> Result<(Vec<LogRecord>, u64)> {
        let path = root.join(LOG_FILE);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let buf = fs::read(&path).with_context(|| format!("read batch log {}", path.display()))?;
        let total = buf.len() as u64;
        if buf.len() < LOG_HDR_SIZE {
            return Ok((Vec::new(), total));
        }
        if &buf[..8] != LOG_MAGIC {
            return Err(anyhow!("bad batch log magic in {}", path.display()));
        }
        let (records, good_len) = parse_records(&buf, &path)?;
        if good_len < total {
            warn!(
                "batch log {}: torn tail of {} bytes ignored (read-only open)",
                path.display(),
                total - good_len
            );
        }
        Ok((records, total))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Текущая длина файла в байтах (header включительно).
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Дописать запись батча. При ошибке файл возвращается к прежней длине,
    /// так что реплей никогда не увидит половину записи как коммит.
    pub fn append(&mut self, seq: Seq, ops: &[WriteOp]) -> Result<()> {
        let payload = encode_ops(ops)?;
        let hdr = build_hdr_with_crc(seq, &payload)?;

        let res = (|| -> Result<()> {
            self.file.seek(SeekFrom::Start(self.len))?;
            self.file.write_all(&hdr)?;
            self.file.write_all(&payload)?;
            if self.fsync {
                self.file.sync_data()?;
                record_log_fsync();
            }
            Ok(())
        })();

        if let Err(e) = res {
            let _ = self.file.set_len(self.len);
            return Err(e).with_context(|| {
                format!("append batch seq={} to {}", seq, self.path.display())
            });
        }

        let total = hdr.len() + payload.len();
        self.len += total as u64;
        record_log_append(total);
        Ok(())
    }

    /// Переписать лог одной записью (seq, ops): tmp + fsync + rename.
    /// ops — живое состояние на seq, выраженное как PUT'ы.
    pub fn rewrite(&mut self, seq: Seq, ops: &[WriteOp]) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        let payload = encode_ops(ops)?;
        let hdr = build_hdr_with_crc(seq, &payload)?;
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            write_file_header(&mut f)?;
            // seq 0 = пустой стор, записывать нечего
            if seq > 0 {
                f.write_all(&hdr)?;
                f.write_all(&payload)?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        // Без fsync каталога rename может не пережить падение.
        fsync_dir(&self.path)
            .with_context(|| format!("fsync dir of {}", self.path.display()))?;

        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("reopen batch log {}", self.path.display()))?;
        self.len = self.file.metadata()?.len();
        debug!(
            "batch log {}: rewritten at seq {} ({} ops, {} bytes)",
            self.path.display(),
            seq,
            ops.len(),
            self.len
        );
        Ok(())
    }
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_file_header(f: &mut File) -> Result<()> {
    let mut hdr = [0u8; LOG_HDR_SIZE];
    hdr[..8].copy_from_slice(LOG_MAGIC);
    LittleEndian::write_u64(&mut hdr[8..16], 0);
    f.seek(SeekFrom::Start(0))?;
    f.write_all(&hdr)?;
    Ok(())
}

fn build_hdr_with_crc(seq: Seq, payload: &[u8]) -> Result<[u8; LOG_REC_HDR_SIZE]> {
    if payload.len() > u32::MAX as usize {
        return Err(anyhow!(
            "batch too large for log record: {} bytes (max {})",
            payload.len(),
            u32::MAX
        ));
    }
    let mut hdr = [0u8; LOG_REC_HDR_SIZE];
    LittleEndian::write_u64(&mut hdr[LOG_REC_OFF_SEQ..LOG_REC_OFF_SEQ + 8], seq);
    LittleEndian::write_u32(
        &mut hdr[LOG_REC_OFF_LEN..LOG_REC_OFF_LEN + 4],
        payload.len() as u32,
    );
    let crc = crc_of(&hdr[..LOG_REC_OFF_CRC32], payload);
    LittleEndian::write_u32(&mut hdr[LOG_REC_OFF_CRC32..LOG_REC_OFF_CRC32 + 4], crc);
    Ok(hdr)
}

fn crc_of(hdr: &[u8], payload: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(hdr);
    h.update(payload);
    h.finalize()
}

/// Разобрать записи после header. Возвращает записи и длину "хорошего" префикса файла.
fn parse_records(buf: &[u8], path: &Path) -> Result<(Vec<LogRecord>, u64)> {
    let mut out = Vec::new();
    let mut pos = LOG_HDR_SIZE;
    let mut last_seq: Seq = 0;

    while pos + LOG_REC_HDR_SIZE <= buf.len() {
        let hdr = &buf[pos..pos + LOG_REC_HDR_SIZE];
        let seq = LittleEndian::read_u64(&hdr[LOG_REC_OFF_SEQ..LOG_REC_OFF_SEQ + 8]);
        let len = LittleEndian::read_u32(&hdr[LOG_REC_OFF_LEN..LOG_REC_OFF_LEN + 4]) as usize;
        let crc_expected = LittleEndian::read_u32(&hdr[LOG_REC_OFF_CRC32..LOG_REC_OFF_CRC32 + 4]);

        let end = pos + LOG_REC_HDR_SIZE + len;
        if end > buf.len() {
            debug!("batch log: partial record at off={}, stop", pos);
            break;
        }
        let payload = &buf[pos + LOG_REC_HDR_SIZE..end];
        let crc_actual = crc_of(&hdr[..LOG_REC_OFF_CRC32], payload);
        if crc_actual != crc_expected {
            warn!(
                "batch log: CRC mismatch at off={}, expected={}, actual={}, stop",
                pos, crc_expected, crc_actual
            );
            break;
        }

        if seq <= last_seq {
            return Err(anyhow!(
                "batch log {}: non-increasing seq {} after {} at off={}",
                path.display(),
                seq,
                last_seq,
                pos
            ));
        }
        let ops = decode_ops(payload)
            .with_context(|| format!("decode batch seq={} in {}", seq, path.display()))?;
        out.push(LogRecord { seq, ops });
        last_seq = seq;
        pos = end;
    }

    Ok((out, pos as u64))
}

pub fn encode_ops(ops: &[WriteOp]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + ops.len() * 32);
    let mut n = [0u8; 4];
    LittleEndian::write_u32(&mut n, ops.len() as u32);
    out.extend_from_slice(&n);

    for op in ops {
        let (code, table, key, value) = match op {
            WriteOp::Put { table, key, value } => (LOG_OP_PUT, table, key, Some(value)),
            WriteOp::Delete { table, key } => (LOG_OP_DELETE, table, key, None),
        };
        if table.len() > u16::MAX as usize {
            return Err(anyhow!("table id too long: {} bytes", table.len()));
        }
        if key.len() > u32::MAX as usize {
            return Err(anyhow!("key too long: {} bytes", key.len()));
        }
        out.push(code);
        let mut t = [0u8; 2];
        LittleEndian::write_u16(&mut t, table.len() as u16);
        out.extend_from_slice(&t);
        out.extend_from_slice(table);
        LittleEndian::write_u32(&mut n, key.len() as u32);
        out.extend_from_slice(&n);
        out.extend_from_slice(key);
        if let Some(v) = value {
            if v.len() > u32::MAX as usize {
                return Err(anyhow!("value too long: {} bytes", v.len()));
            }
            LittleEndian::write_u32(&mut n, v.len() as u32);
            out.extend_from_slice(&n);
            out.extend_from_slice(v);
        }
    }
    Ok(out)
}

pub fn decode_ops(buf: &[u8]) -> Result<Vec<WriteOp>> {
    let mut cur = Cursor { buf, pos: 0 };
    let count = cur.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let code = cur.take(1)?[0];
        let tlen = cur.u16()? as usize;
        let table = cur.take(tlen)?.to_vec();
        let klen = cur.u32()? as usize;
        let key = cur.take(klen)?.to_vec();
        match code {
            LOG_OP_PUT => {
                let vlen = cur.u32()? as usize;
                let value = cur.take(vlen)?.to_vec();
                ops.push(WriteOp::Put { table, key, value });
            }
            LOG_OP_DELETE => ops.push(WriteOp::Delete { table, key }),
            other => return Err(anyhow!("unknown op code {} at off={}", other, cur.pos - 1)),
        }
    }
    if cur.pos != buf.len() {
        return Err(anyhow!(
            "trailing bytes in batch payload: {} of {}",
            buf.len() - cur.pos,
            buf.len()
        ));
    }
    Ok(ops)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| anyhow!("batch payload truncated at off={} (need {})", self.pos, n))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }
}
