//! util — мелкие хелперы CLI и тестов.
//!
//! Содержит:
//! - hex_encode()/hex_decode(): ключи и идентификаторы таблиц в командной строке;
//! - display_text(): печать значения как текста, если это UTF-8.

use anyhow::{anyhow, Result};

/// Байты → нижний hex без разделителей.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Hex → байты. Допускаются префикс "0x", пробелы и ':' между байтами.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits: Vec<u8> = s
        .bytes()
        .filter(|c| !c.is_ascii_whitespace() && *c != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(anyhow!("odd number of hex digits in '{}'", s));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = nibble(pair[0])?;
            let lo = nibble(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(anyhow!("invalid hex digit '{}'", c as char)),
    }
}

pub fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(|c| c.is_control()) => s.to_string(),
        _ => format!("(binary {} B)", bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_prefix_and_separators() {
        assert_eq!(hex_decode("0x4001").unwrap(), vec![0x40, 0x01]);
        assert_eq!(hex_decode("de:ad BE ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hex_decode("").unwrap(), Vec::<u8>::new());
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }

    #[test]
    fn hex_encode_is_lowercase() {
        assert_eq!(hex_encode(&[0x00, 0xAB, 0x7f]), "00ab7f");
    }

    #[test]
    fn display_text_marks_binary() {
        assert_eq!(display_text(b"hello"), "hello");
        assert_eq!(display_text(&[0xff, 0x00]), "(binary 2 B)");
    }
}
