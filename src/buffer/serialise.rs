//! Length-prefixed framing.
//!
//! `serialise_bb` writes a 16-bit big-endian length followed by the payload;
//! a sequence is a 16-bit big-endian element count followed by each element
//! framed the same way. Command messages and persisted credential records are
//! both built on this.

use super::{BufferError, ByteBuffer};

/// Largest payload a single length field can describe.
pub const MAX_SERIALISED_LEN: usize = u16::MAX as usize;

/// Bounds-checked cursor over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BufferError> {
        if len > self.remaining() {
            return Err(BufferError::Truncated {
                declared: len,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// One length-prefixed element.
    pub fn read_framed(&mut self) -> Result<ByteBuffer, BufferError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len).map(ByteBuffer::from)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(self) -> Result<(), BufferError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(BufferError::TrailingData(n)),
        }
    }
}

fn push_len(out: &mut ByteBuffer, len: usize) -> Result<(), BufferError> {
    let len = u16::try_from(len).map_err(|_| BufferError::TooLarge(len))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

pub fn serialise_bb(bb: &ByteBuffer) -> Result<ByteBuffer, BufferError> {
    let mut out = ByteBuffer::new();
    push_len(&mut out, bb.len())?;
    out += bb;
    Ok(out)
}

pub fn deserialise_bb(bb: &ByteBuffer) -> Result<ByteBuffer, BufferError> {
    let mut reader = ByteReader::new(bb.as_slice());
    let payload = reader.read_framed()?;
    reader.finish()?;
    Ok(payload)
}

pub fn serialise_byte_buffers(bbs: &[ByteBuffer]) -> Result<ByteBuffer, BufferError> {
    let count = u16::try_from(bbs.len()).map_err(|_| BufferError::TooManyBuffers(bbs.len()))?;
    let mut out = ByteBuffer::from(count.to_be_bytes());
    for bb in bbs {
        push_len(&mut out, bb.len())?;
        out += bb;
    }
    Ok(out)
}

pub fn deserialise_byte_buffers(bb: &ByteBuffer) -> Result<Vec<ByteBuffer>, BufferError> {
    let mut reader = ByteReader::new(bb.as_slice());
    let count = reader.read_u16()? as usize;
    // Each element needs at least its 2-byte length field.
    if count * 2 > reader.remaining() {
        return Err(BufferError::Truncated {
            declared: count * 2,
            available: reader.remaining(),
        });
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(reader.read_framed()?);
    }
    reader.finish()?;
    Ok(out)
}
