//! IEEE 488.2 arbitrary block data
//!
//! Definite form: `#<n><len><data>` where `<n>` is the number of digits in `<len>`.
//! Indefinite form: `#0<data>` running up to the message terminator.

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Bytes taken by the header itself
    pub header_len: usize,
    /// Payload length, `None` for the indefinite form
    pub data_len: Option<usize>,
}
impl BlockHeader {
    /// Digit count announced by the first two header bytes.
    pub fn digits(prefix: &[u8]) -> Result<usize> {
        match prefix {
            [b'#', d, ..] if d.is_ascii_digit() => Ok((d - b'0') as usize),
            [b'#', d, ..] => Err(Error::Parse(format!(
                "Block header digit count `{}` is not a digit",
                char::from(*d)
            ))),
            [first, ..] => Err(Error::Parse(format!(
                "Expected block data, reply starts with `{}`",
                char::from(*first).escape_default()
            ))),
            [] => Err(Error::Parse("Empty reply where block data was expected".into())),
        }
    }

    pub fn parse(header: &[u8]) -> Result<Self> {
        let digits = Self::digits(header)?;
        if digits == 0 {
            return Ok(Self {
                header_len: 2,
                data_len: None,
            });
        }

        let Some(len) = header.get(2..2 + digits) else {
            return Err(Error::Parse(format!(
                "Block header truncated, expected {digits} length digits"
            )));
        };
        let data_len = std::str::from_utf8(len)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                Error::Parse(format!(
                    "Block length `{}` is not a number",
                    String::from_utf8_lossy(len)
                ))
            })?;

        Ok(Self {
            header_len: 2 + digits,
            data_len: Some(data_len),
        })
    }
}

/// Extract the payload from a complete block reply. A single trailing newline (optionally
/// preceded by a carriage return) is allowed after definite blocks.
pub fn parse_block(reply: &[u8]) -> Result<&[u8]> {
    let header = BlockHeader::parse(reply)?;
    let body = &reply[header.header_len..];

    let Some(len) = header.data_len else {
        return Ok(strip_terminator(body));
    };
    if body.len() < len {
        return Err(Error::Parse(format!(
            "Block declared {len} bytes but only {} arrived",
            body.len()
        )));
    }

    let (data, rest) = body.split_at(len);
    if !is_terminator(rest) {
        return Err(Error::Parse(format!(
            "Block declared {len} bytes but {} more followed",
            rest.len()
        )));
    }
    Ok(data)
}

/// Whether `rest` is nothing but an optional `\r\n` or `\n`.
pub(crate) fn is_terminator(rest: &[u8]) -> bool {
    matches!(rest, [] | [b'\n'] | [b'\r', b'\n'])
}

pub(crate) fn strip_terminator(data: &[u8]) -> &[u8] {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.strip_suffix(b"\r").unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definite_block() {
        assert_eq!(parse_block(b"#15hello\n").unwrap(), b"hello");
        assert_eq!(parse_block(b"#2100123456789").unwrap(), b"0123456789");
        /* Binary payloads may contain newlines */
        assert_eq!(parse_block(b"#13\n\r\n\r\n").unwrap(), b"\n\r\n");
        assert_eq!(parse_block(b"#10\n").unwrap(), b"");
    }

    #[test]
    fn indefinite_block() {
        assert_eq!(parse_block(b"#0abc\n").unwrap(), b"abc");
        assert_eq!(
            BlockHeader::parse(b"#0").unwrap(),
            BlockHeader {
                header_len: 2,
                data_len: None
            }
        );
    }

    #[test]
    fn mismatched_blocks_are_parse_errors() {
        for bad in [
            &b"15hello"[..],
            b"#x5hello",
            b"#3",
            b"#2a5hello",
            b"#16hello",
            b"#14hello\n",
            b"",
        ] {
            assert!(
                matches!(parse_block(bad), Err(Error::Parse(_))),
                "{} should be rejected",
                String::from_utf8_lossy(bad)
            );
        }
    }
}
