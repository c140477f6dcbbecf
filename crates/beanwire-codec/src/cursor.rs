//! A [`ByteBuffer`] plus a read position.
//!
//! Writes ("marshal") always append at the end of the buffer. Reads
//! ("unmarshal") advance `pos` and fail with [`CodecError::Eof`] when the
//! value is not fully buffered yet. Fixed-width reads check availability
//! first, so a failed read leaves `pos` untouched.
//!
//! The varint and field codecs add more methods to `Cursor` in their own
//! modules; this file only holds raw byte and fixed-width primitives.

use crate::field::MAX_NESTING;
use crate::{ByteBuffer, CodecError};

/// Byte buffer with an independent read position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    buf: ByteBuffer,
    pos: usize,
    /// Nested beans currently being decoded.
    depth: u32,
}

impl Cursor {
    /// Creates an empty cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cursor with room for `n` bytes.
    pub fn with_capacity(n: usize) -> Self {
        Self::wrap(ByteBuffer::with_capacity(n))
    }

    /// Wraps an existing buffer, reading from its start.
    pub fn wrap(buf: ByteBuffer) -> Self {
        Self { buf, pos: 0, depth: 0 }
    }

    /// Copies `data` into a new cursor positioned at its start.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::wrap(ByteBuffer::from_slice(data))
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buf
    }

    pub fn into_buffer(self) -> ByteBuffer {
        self.buf
    }

    /// All stored bytes, regardless of `pos`.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Total stored bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves the read position, clamped to `len`.
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread bytes.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.buf.as_slice()[self.pos..]
    }

    /// `true` once every stored byte has been read.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Drops all bytes and rewinds.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Erases everything before `pos` and rewinds to 0.
    pub fn compact(&mut self) {
        self.buf.erase_front(self.pos);
        self.pos = 0;
    }

    /// Runs `f` with the readable end temporarily capped at `end`.
    ///
    /// Reads inside `f` see `end` as the end of the stream, so a value that
    /// tries to read past it fails with [`CodecError::Eof`]. The bytes past
    /// `end` are untouched and visible again when `f` returns. `f` must not
    /// write to the cursor.
    pub fn with_limit<R>(&mut self, end: usize, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.buf.len();
        let end = end.clamp(self.pos, saved);
        self.buf.resize(end);
        let result = f(self);
        self.buf.resize(saved);
        result
    }

    /// Runs `f` to decode a bean one nesting level below the current one.
    ///
    /// # Errors
    /// [`CodecError::Malformed`], without calling `f`, once
    /// [`MAX_NESTING`] levels are already open.
    pub fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, CodecError>) -> Result<R, CodecError> {
        if self.depth >= MAX_NESTING {
            return Err(CodecError::Malformed(format!(
                "beans nested deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Bean nesting levels currently open.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Appends one byte.
    pub fn marshal_u8(&mut self, b: u8) -> &mut Self {
        self.buf.push(b);
        self
    }

    /// Appends raw bytes without a length prefix.
    pub fn marshal_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.append(data);
        self
    }

    /// Appends the low `n` bytes of `v`, big-endian.
    pub fn marshal_be(&mut self, v: u64, n: usize) -> &mut Self {
        let bytes = v.to_be_bytes();
        self.buf.append(&bytes[8 - n..]);
        self
    }

    pub fn marshal_f32(&mut self, v: f32) -> &mut Self {
        self.marshal_raw(&v.to_be_bytes())
    }

    pub fn marshal_f64(&mut self, v: f64) -> &mut Self {
        self.marshal_raw(&v.to_be_bytes())
    }

    /// Overwrites `data.len()` bytes ending at `end`.
    ///
    /// # Panics
    /// Panics if `end` is past the stored length or `data` is longer than
    /// `end`.
    pub(crate) fn overwrite_before(&mut self, end: usize, data: &[u8]) {
        let len = self.buf.len();
        assert!(end <= len && data.len() <= end, "back-patch outside buffer");
        self.buf.storage_mut()[end - data.len()..end].copy_from_slice(data);
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            Err(CodecError::Eof)
        } else {
            Ok(())
        }
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.as_slice()[self.pos])
    }

    pub fn unmarshal_u8(&mut self) -> Result<u8, CodecError> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    /// Borrows the next `n` bytes and consumes them.
    pub fn unmarshal_raw(&mut self, n: usize) -> Result<&[u8], CodecError> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf.as_slice()[start..start + n])
    }

    /// Reads an `n`-byte big-endian unsigned integer (`n ≤ 8`).
    pub fn unmarshal_be(&mut self, n: usize) -> Result<u64, CodecError> {
        let bytes = self.unmarshal_raw(n)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    pub fn unmarshal_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.unmarshal_be(4)? as u32))
    }

    pub fn unmarshal_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.unmarshal_be(8)?))
    }

    /// Advances past `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }
}
