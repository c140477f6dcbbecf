//! Growable byte buffer with explicit length and capacity.
//!
//! [`ByteBuffer`] is the storage under every [`Cursor`](crate::Cursor).
//! Unlike `Vec<u8>`, the bytes between `len` and `capacity` are always
//! allocated and initialized, so shrinking the length and growing it again
//! never reallocates. The receive path relies on this to temporarily cap a
//! buffer at a frame boundary and restore it afterwards.
//!
//! Index arguments are clamped rather than rejected: `erase(3, 100)` on a
//! 10-byte buffer erases `3..10`, `insert(50, ..)` appends.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Smallest capacity ever allocated. Growth doubles from here.
pub const DEFAULT_SIZE: usize = 16;

/// Growable byte array with an explicit valid length.
#[derive(Default)]
pub struct ByteBuffer {
    /// Backing storage. `buf.len()` is the capacity.
    buf: Vec<u8>,
    /// Number of valid bytes at the front of `buf`.
    len: usize,
}

/// Returns the capacity that `reserve(n)` grows to: the smallest power of
/// two that is at least `n` and at least [`DEFAULT_SIZE`].
fn grown_capacity(n: usize) -> usize {
    n.max(DEFAULT_SIZE).checked_next_power_of_two().unwrap_or(n)
}

impl ByteBuffer {
    /// Creates an empty buffer without allocating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer able to hold at least `n` bytes.
    pub fn with_capacity(n: usize) -> Self {
        let mut buffer = Self::new();
        buffer.reserve_space(n);
        buffer
    }

    /// Copies `data` into a new buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(data.len());
        buffer.append(data);
        buffer
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes the buffer can hold before growing.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The valid bytes, `[0, len)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Mutable view of the valid bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Full backing storage including the unused tail.
    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Consumes the buffer and returns the valid bytes as a `Vec`.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }

    /// Consumes the buffer and returns its whole backing storage plus the
    /// valid length, without copying.
    pub(crate) fn into_raw_parts(self) -> (Vec<u8>, usize) {
        (self.buf, self.len)
    }

    // -----------------------------------------------------------------------
    // Capacity management
    // -----------------------------------------------------------------------

    /// Grows capacity to at least `n`, preserving the stored bytes.
    pub fn reserve(&mut self, n: usize) {
        if n > self.buf.len() {
            self.buf.resize(grown_capacity(n), 0);
        }
    }

    /// Grows capacity to at least `n` without preserving the stored bytes.
    ///
    /// Use this when the whole buffer is about to be overwritten: it skips
    /// the copy `reserve` would do. The length is left unchanged, so the
    /// caller must rewrite or resize before reading.
    pub fn reserve_space(&mut self, n: usize) {
        if n > self.buf.len() {
            self.buf = vec![0; grown_capacity(n)];
        }
    }

    /// Sets the length to `n`, growing capacity if needed.
    ///
    /// Bytes between the old and new length are unspecified when growing.
    pub fn resize(&mut self, n: usize) {
        self.reserve(n);
        self.len = n;
    }

    /// Drops every byte without releasing capacity.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Releases capacity beyond the current length.
    pub fn shrink(&mut self) {
        self.buf.truncate(self.len);
        self.buf.shrink_to_fit();
    }

    /// Exchanges contents with `other`.
    pub fn swap(&mut self, other: &mut ByteBuffer) {
        std::mem::swap(self, other);
    }

    // -----------------------------------------------------------------------
    // Splicing
    // -----------------------------------------------------------------------

    /// Replaces the whole contents with `data`.
    pub fn replace(&mut self, data: &[u8]) {
        self.reserve_space(data.len());
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
    }

    /// Appends one byte.
    pub fn push(&mut self, b: u8) {
        self.reserve(self.len + 1);
        self.buf[self.len] = b;
        self.len += 1;
    }

    /// Appends `data` at the end.
    pub fn append(&mut self, data: &[u8]) {
        let end = self.len + data.len();
        self.reserve(end);
        self.buf[self.len..end].copy_from_slice(data);
        self.len = end;
    }

    /// Inserts `data` before index `at` (clamped to `len`).
    pub fn insert(&mut self, at: usize, data: &[u8]) {
        let at = at.min(self.len);
        let n = data.len();
        self.reserve(self.len + n);
        self.buf.copy_within(at..self.len, at + n);
        self.buf[at..at + n].copy_from_slice(data);
        self.len += n;
    }

    /// Removes the bytes in `[from, to)`, both clamped to `len`.
    pub fn erase(&mut self, from: usize, to: usize) {
        let to = to.min(self.len);
        let from = from.min(to);
        if from == to {
            return;
        }
        self.buf.copy_within(to..self.len, from);
        self.len -= to - from;
    }

    /// Removes the first `n` bytes (clamped to `len`).
    pub fn erase_front(&mut self, n: usize) {
        self.erase(0, n);
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Index of the first `b` at or after `from`.
    pub fn find(&self, from: usize, b: u8) -> Option<usize> {
        let from = from.min(self.len);
        self.as_slice()[from..]
            .iter()
            .position(|&x| x == b)
            .map(|i| i + from)
    }

    /// Index of the first occurrence of `needle` at or after `from`.
    ///
    /// An empty needle matches at `from`.
    pub fn find_slice(&self, from: usize, needle: &[u8]) -> Option<usize> {
        let from = from.min(self.len);
        if needle.is_empty() {
            return Some(from);
        }
        self.as_slice()[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| i + from)
    }

    // -----------------------------------------------------------------------
    // Hashing and dumping
    // -----------------------------------------------------------------------

    /// Content hash that matches what existing peers compute.
    ///
    /// Buffers over 32 bytes only sample their first and last 16 bytes.
    /// Bytes are folded as signed values.
    pub fn sampled_hash(&self) -> i32 {
        let data = self.as_slice();
        let fold = |h: i32, b: &u8| h.wrapping_mul(31).wrapping_add(*b as i8 as i32);
        let seed = data.len() as i32;
        if data.len() <= 32 {
            data.iter().fold(seed, fold)
        } else {
            let head = data[..16].iter().fold(seed, fold);
            data[data.len() - 16..].iter().fold(head, fold)
        }
    }

    /// Renders the bytes as `[0A FF ..]`.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.len * 3 + 2);
        out.push('[');
        for (i, b) in self.as_slice().iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{b:02X}"));
        }
        out.push(']');
        out
    }
}

impl Clone for ByteBuffer {
    fn clone(&self) -> Self {
        Self::from_slice(self.as_slice())
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBuffer({}){}", self.len, self.dump())
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteBuffer {}

impl PartialOrd for ByteBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Unsigned byte-wise order; a proper prefix sorts first.
impl Ord for ByteBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl Hash for ByteBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.sampled_hash());
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len }
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}
