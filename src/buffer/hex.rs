use std::io::Read;

use super::{BufferError, ByteBuffer};

pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse a complete hex string. Case-insensitive.
pub fn decode(text: &str) -> Result<Vec<u8>, BufferError> {
    let chars = text.as_bytes();
    if chars.len() % 2 != 0 {
        return Err(BufferError::OddHexLength);
    }
    chars
        .chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

fn nibble(c: u8) -> Result<u8, BufferError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(BufferError::BadHexChar(char::from(c))),
    }
}

impl ByteBuffer {
    /// Read one whitespace-delimited hex token from `reader`.
    ///
    /// Leading whitespace is skipped and the terminating whitespace byte is
    /// consumed. The token must hold an even number of hex digits; any other
    /// character before the terminator is an error, so callers must end input
    /// with whitespace (or end of stream), not with arbitrary punctuation.
    pub fn read_hex<R: Read>(reader: &mut R) -> Result<ByteBuffer, BufferError> {
        let mut out = ByteBuffer::new();
        let mut pending: Option<u8> = None;
        let mut started = false;
        for byte in reader.bytes() {
            let c = byte?;
            if c.is_ascii_whitespace() {
                if started {
                    break;
                }
                continue;
            }
            started = true;
            let value = nibble(c)?;
            match pending.take() {
                Some(high) => out.push((high << 4) | value),
                None => pending = Some(value),
            }
        }
        if pending.is_some() {
            return Err(BufferError::OddHexLength);
        }
        Ok(out)
    }
}
