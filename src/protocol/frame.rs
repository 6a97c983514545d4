//! Фрейминг для TCP-транспорта: `[len u32 LE][payload len]`, payload = JSON envelope.
//!
//! Кадр длиннее max_len не читается в память: его тело пропускается, а вызывающий
//! получает Frame::Oversized и отвечает ошибкой, не разрывая соединение.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read, Write};

pub const FRAME_HDR_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Oversized(usize),
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(anyhow!("frame payload too large: {}", payload.len()));
    }
    let mut hdr = [0u8; FRAME_HDR_LEN];
    LittleEndian::write_u32(&mut hdr, payload.len() as u32);
    w.write_all(&hdr)?;
    if !payload.is_empty() {
        w.write_all(payload)?;
    }
    w.flush()?;
    Ok(())
}

/// Ok(None) — чистый EOF (в том числе посреди кадра: соединение закрыто).
pub fn read_frame<R: Read>(r: &mut R, max_len: usize) -> io::Result<Option<Frame>> {
    let mut hdr = [0u8; FRAME_HDR_LEN];
    if !read_exact_or_eof(r, &mut hdr)? {
        return Ok(None);
    }
    let len = LittleEndian::read_u32(&hdr) as usize;
    if len > max_len {
        let skipped = io::copy(&mut r.by_ref().take(len as u64), &mut io::sink())?;
        if skipped < len as u64 {
            return Ok(None);
        }
        return Ok(Some(Frame::Oversized(len)));
    }
    let mut payload = vec![0u8; len];
    if len > 0 && !read_exact_or_eof(r, &mut payload)? {
        return Ok(None);
    }
    Ok(Some(Frame::Data(payload)))
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut off = 0usize;
    while off < buf.len() {
        match r.read(&mut buf[off..]) {
            Ok(0) => return Ok(false),
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn oversized_frame_is_skipped_and_stream_stays_aligned() -> Result<()> {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[7u8; 100])?;
        write_frame(&mut buf, b"{}")?;
        let mut r = Cursor::new(buf);
        assert_eq!(read_frame(&mut r, 64)?, Some(Frame::Oversized(100)));
        assert_eq!(read_frame(&mut r, 64)?, Some(Frame::Data(b"{}".to_vec())));
        assert_eq!(read_frame(&mut r, 64)?, None);
        Ok(())
    }

    #[test]
    fn eof_inside_frame_is_close() -> Result<()> {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abcdef")?;
        buf.truncate(7);
        assert_eq!(read_frame(&mut Cursor::new(buf), 64)?, None);
        Ok(())
    }
}
