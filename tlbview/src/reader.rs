//! Bounds-checked little-endian cursor over descriptor bytes.
//!
//! Every read either succeeds completely or returns
//! [`Error::MalformedDescriptor`] carrying the offset at which the read
//! started. Nothing here interprets the bytes beyond their bit layout.

use uguid::Guid;

use crate::error::{Error, Result};

/// Cursor over a borrowed byte buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.seek(pos)?;
        Ok(reader)
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::malformed(
                pos,
                format!("seek past end of {}-byte buffer", self.data.len()),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    /// Borrow the next `count` bytes.
    pub fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(Error::malformed(
                self.pos,
                format!("need {count} bytes, have {}", self.remaining()),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::malformed(self.pos, "need 1 byte, have 0"))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// A GUID in its in-memory (mixed-endian) byte order.
    pub fn read_guid(&mut self) -> Result<Guid> {
        Ok(Guid::from_bytes(self.array()?))
    }

    /// A `u16` unit count followed by UTF-16LE code units.
    pub fn read_bstr(&mut self) -> Result<String> {
        let start = self.pos;
        let units = self.read_u16()? as usize;
        let bytes = self.take(units * 2)?;
        let wide: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&wide).map_err(|e| Error::malformed(start, format!("bad UTF-16: {e}")))
    }

    /// A `u32` byte length followed by that many bytes.
    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Validate a 4-byte record tag and return its layout version, which must
    /// be one of `versions`.
    pub fn read_header(&mut self, tag: &[u8; 4], versions: &[u16]) -> Result<u16> {
        let found: [u8; 4] = self.array()?;
        if &found != tag {
            return Err(Error::UnsupportedLayout(format!(
                "expected `{}` record, found tag {:02x?}",
                String::from_utf8_lossy(tag),
                found
            )));
        }
        let version = self.read_u16()?;
        if !versions.contains(&version) {
            return Err(Error::UnsupportedLayout(format!(
                "`{}` record version {version}",
                String::from_utf8_lossy(tag)
            )));
        }
        Ok(version)
    }

    /// Require that the whole buffer was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::malformed(
                self.pos,
                format!("{} trailing bytes after record", self.remaining()),
            ));
        }
        Ok(())
    }
}
