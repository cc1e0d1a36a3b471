use std::ops::Range;

use super::{DbError, Result};

const I32_LEN: usize = std::mem::size_of::<i32>();
const I64_LEN: usize = std::mem::size_of::<i64>();

/// Fixed-size byte buffer with bounds-checked little-endian accessors.
///
/// A page is both the in-memory image of a disk block and the scratch
/// buffer the log manager packs records into. It never grows.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    buf: Box<[u8]>,
}

impl Page {
    /// Creates a zero-filled page of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            buf: vec![0u8; block_size].into_boxed_slice(),
        }
    }

    /// Wraps existing bytes; the page size is the length of `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: bytes.into_boxed_slice(),
        }
    }

    /// Bytes needed to store a string of `strlen` bytes with its length prefix.
    pub const fn max_length(strlen: usize) -> usize {
        I32_LEN + strlen
    }

    /// Page size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true for a zero-length page.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Raw page contents.
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable raw page contents.
    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Zeroes the whole page.
    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    fn range(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.buf.len() => Ok(offset..end),
            _ => Err(DbError::PageOutOfBounds {
                offset,
                len,
                page_size: self.buf.len(),
            }),
        }
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let range = self.range(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[range]);
        Ok(out)
    }

    /// Reads a 4-byte signed integer.
    pub fn get_i32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(offset)?))
    }

    /// Writes a 4-byte signed integer.
    pub fn set_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        let range = self.range(offset, I32_LEN)?;
        self.buf[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads an 8-byte signed integer.
    pub fn get_i64(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array(offset)?))
    }

    /// Writes an 8-byte signed integer.
    pub fn set_i64(&mut self, offset: usize, value: i64) -> Result<()> {
        let range = self.range(offset, I64_LEN)?;
        self.buf[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a single signed byte.
    pub fn get_i8(&self, offset: usize) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array(offset)?))
    }

    /// Writes a single signed byte.
    pub fn set_i8(&mut self, offset: usize, value: i8) -> Result<()> {
        let range = self.range(offset, 1)?;
        self.buf[range.start] = value as u8;
        Ok(())
    }

    /// Reads a boolean stored as one byte (non-zero is true).
    pub fn get_bool(&self, offset: usize) -> Result<bool> {
        Ok(self.get_i8(offset)? != 0)
    }

    /// Writes a boolean as one byte.
    pub fn set_bool(&mut self, offset: usize, value: bool) -> Result<()> {
        self.set_i8(offset, i8::from(value))
    }

    /// Reads a length-prefixed byte run.
    pub fn get_bytes(&self, offset: usize) -> Result<&[u8]> {
        let len = self.get_i32(offset)?;
        let len = usize::try_from(len).map_err(|_| DbError::PageOutOfBounds {
            offset,
            len: I32_LEN,
            page_size: self.buf.len(),
        })?;
        let range = self.range(offset + I32_LEN, len)?;
        Ok(&self.buf[range])
    }

    /// Writes a length-prefixed byte run.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let len = i32::try_from(bytes.len()).map_err(|_| DbError::Invalid("byte run too long"))?;
        let range = self.range(offset, Self::max_length(bytes.len()))?;
        self.buf[range.start..range.start + I32_LEN].copy_from_slice(&len.to_le_bytes());
        self.buf[range.start + I32_LEN..range.end].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_string(&self, offset: usize) -> Result<String> {
        let bytes = self.get_bytes(offset)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DbError::InvalidUtf8)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn set_string(&mut self, offset: usize, value: &str) -> Result<()> {
        self.set_bytes(offset, value.as_bytes())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("len", &self.buf.len()).finish()
    }
}
