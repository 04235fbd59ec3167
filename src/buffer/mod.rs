//! Owned, resizable octet buffer used for every wire message, credential
//! record and cryptographic value in the crate.

pub mod hex;
pub mod serialise;

use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut};

use zeroize::Zeroize;

pub use serialise::{
    ByteReader, MAX_SERIALISED_LEN, deserialise_bb, deserialise_byte_buffers, serialise_bb,
    serialise_byte_buffers,
};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("range {start}+{length} exceeds buffer of {size} bytes")]
    OutOfRange {
        start: usize,
        length: usize,
        size: usize,
    },
    #[error("pad target {target} is shorter than current length {current}")]
    PadTooShort { target: usize, current: usize },
    #[error("odd number of hex characters")]
    OddHexLength,
    #[error("invalid hex character {0:?}")]
    BadHexChar(char),
    #[error("buffer of {0} bytes is too large to serialise")]
    TooLarge(usize),
    #[error("too many buffers to serialise: {0}")]
    TooManyBuffers(usize),
    #[error("truncated: declared {declared} bytes, {available} available")]
    Truncated { declared: usize, available: usize },
    #[error("{0} trailing bytes after framed data")]
    TrailingData(usize),
    #[error("invalid UTF-8 text")]
    Utf8,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered sequence of octets with value semantics.
///
/// Equality and ordering are byte-wise. Plain indexing panics like a slice;
/// the `get`/`get_part`/`set_part` family is bounds-checked and reports
/// [`BufferError::OutOfRange`].
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteBuffer(Vec<u8>);

impl ByteBuffer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    pub fn filled(len: usize, byte: u8) -> Self {
        Self(vec![byte; len])
    }

    /// One byte per UTF-8 octet of `text`.
    pub fn from_text(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    pub fn from_hex(text: &str) -> Result<Self, BufferError> {
        hex::decode(text).map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn get(&self, pos: usize) -> Result<u8, BufferError> {
        self.0.get(pos).copied().ok_or(BufferError::OutOfRange {
            start: pos,
            length: 1,
            size: self.0.len(),
        })
    }

    pub fn set(&mut self, pos: usize, byte: u8) -> Result<(), BufferError> {
        let size = self.0.len();
        let slot = self.0.get_mut(pos).ok_or(BufferError::OutOfRange {
            start: pos,
            length: 1,
            size,
        })?;
        *slot = byte;
        Ok(())
    }

    /// Copy of `length` bytes starting at `start`.
    pub fn get_part(&self, start: usize, length: usize) -> Result<ByteBuffer, BufferError> {
        let end = self.checked_end(start, length)?;
        Ok(Self(self.0[start..end].to_vec()))
    }

    /// Overwrite bytes starting at `start` with `part`. The buffer never grows.
    pub fn set_part(&mut self, start: usize, part: &ByteBuffer) -> Result<(), BufferError> {
        let end = self.checked_end(start, part.len())?;
        self.0[start..end].copy_from_slice(part.as_slice());
        Ok(())
    }

    fn checked_end(&self, start: usize, length: usize) -> Result<usize, BufferError> {
        match start.checked_add(length) {
            Some(end) if end <= self.0.len() => Ok(end),
            _ => Err(BufferError::OutOfRange {
                start,
                length,
                size: self.0.len(),
            }),
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn resize(&mut self, len: usize) {
        self.0.resize(len, 0);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Grow to exactly `target` bytes by appending `byte`.
    pub fn pad_right(&mut self, target: usize, byte: u8) -> Result<(), BufferError> {
        let current = self.0.len();
        if target < current {
            return Err(BufferError::PadTooShort { target, current });
        }
        self.0.resize(target, byte);
        Ok(())
    }

    /// Grow to exactly `target` bytes by prepending `byte`.
    pub fn pad_left(&mut self, target: usize, byte: u8) -> Result<(), BufferError> {
        let current = self.0.len();
        if target < current {
            return Err(BufferError::PadTooShort { target, current });
        }
        let mut padded = vec![byte; target];
        padded[target - current..].copy_from_slice(&self.0);
        self.0.zeroize();
        self.0 = padded;
        Ok(())
    }

    /// Drop trailing zero bytes.
    pub fn truncate(&mut self) {
        while self.0.last() == Some(&0) {
            self.0.pop();
        }
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn to_utf8(&self) -> Result<String, BufferError> {
        String::from_utf8(self.0.clone()).map_err(|_| BufferError::Utf8)
    }
}

impl Zeroize for ByteBuffer {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBuffer({})", self.to_hex_string())
    }
}

/// Hex, lowercase, no trailing whitespace.
impl fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

impl std::str::FromStr for ByteBuffer {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for ByteBuffer {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for ByteBuffer {
    fn from(bytes: &[u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<ByteBuffer> for Vec<u8> {
    fn from(bb: ByteBuffer) -> Self {
        bb.into_vec()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromIterator<u8> for ByteBuffer {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<u8> for ByteBuffer {
    fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl Index<usize> for ByteBuffer {
    type Output = u8;

    fn index(&self, pos: usize) -> &u8 {
        &self.0[pos]
    }
}

impl IndexMut<usize> for ByteBuffer {
    fn index_mut(&mut self, pos: usize) -> &mut u8 {
        &mut self.0[pos]
    }
}

impl AddAssign<&ByteBuffer> for ByteBuffer {
    fn add_assign(&mut self, rhs: &ByteBuffer) {
        self.0.extend_from_slice(&rhs.0);
    }
}

impl AddAssign<ByteBuffer> for ByteBuffer {
    fn add_assign(&mut self, rhs: ByteBuffer) {
        self.0.extend_from_slice(&rhs.0);
    }
}

impl Add<&ByteBuffer> for &ByteBuffer {
    type Output = ByteBuffer;

    fn add(self, rhs: &ByteBuffer) -> ByteBuffer {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Add for ByteBuffer {
    type Output = ByteBuffer;

    fn add(mut self, rhs: ByteBuffer) -> ByteBuffer {
        self += &rhs;
        self
    }
}

pub fn uint16_to_bb(value: u16) -> ByteBuffer {
    ByteBuffer::from(value.to_be_bytes())
}

pub fn uint32_to_bb(value: u32) -> ByteBuffer {
    ByteBuffer::from(value.to_be_bytes())
}

/// Each byte becomes one `char` (Latin-1), so arbitrary binary survives.
pub fn bb_to_string(bb: &ByteBuffer) -> String {
    bb.as_slice().iter().map(|&b| char::from(b)).collect()
}

/// Write `bb` as text. Trailing NUL and whitespace are dropped, other
/// non-printable bytes are shown as `?`.
pub fn print_bb_as_characters<W: fmt::Write>(out: &mut W, bb: &ByteBuffer) -> fmt::Result {
    let bytes = bb.as_slice();
    let end = bytes
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |last| last + 1);
    for &b in &bytes[..end] {
        if b.is_ascii_whitespace() || b.is_ascii_graphic() {
            out.write_char(char::from(b))?;
        } else {
            out.write_char('?')?;
        }
    }
    Ok(())
}
