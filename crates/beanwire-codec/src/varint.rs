//! Variable-length integer encodings.
//!
//! Three families share this module:
//!
//! - **unsigned 32-bit** (`uint`): lengths, counts, type ids. 1 to 5 bytes,
//!   the number of leading 1 bits in the first byte says how many bytes
//!   follow.
//! - **unsigned 64-bit** (`ulong`): the same scheme extended to 9 bytes.
//! - **signed** (`int`): field values and frame serials. 1 to 9 bytes. Small
//!   magnitudes of either sign fit in one byte; each longer class adds a
//!   bias so the first byte's high bits identify the length. Positive
//!   classes start with `0b0..`, negative classes with `0b1..`.
//!
//! All multi-byte forms are big-endian. A 32-bit signed value is encoded
//! exactly like the same value widened to `i64`, so there is one encoder.
//!
//! ```text
//!  signed, x >= 0            first byte      signed, x < 0
//!  < 0x40            1 byte  00xx_xxxx  11xx_xxxx  >= -0x40
//!  < 0x2000          2       010x_xxxx  101x_xxxx  >= -0x2000
//!  < 0x10_0000       3       0110_xxxx  1001_xxxx  >= -0x10_0000
//!  < 0x800_0000      4       0111_0xxx  1000_1xxx  >= -0x800_0000
//!  < 2^34            5       0111_10xx  1000_01xx  >= -2^34
//!  < 2^41            6       0111_110x  1000_001x  >= -2^41
//!  < 2^48            7       0111_1110  1000_0001  >= -2^48
//!  < 2^55            8       0111_1111  1000_0000  >= -2^55
//!  else              9       0x7F + 8   0x80 + 8   else
//! ```
//! The 8- and 9-byte forms share a first byte and are told apart by the top
//! bit of the second byte.

use crate::{CodecError, Cursor};

/// Longest unsigned 32-bit encoding.
pub const MAX_UINT_LEN: usize = 5;
/// Longest signed encoding of an `i32`.
pub const MAX_INT32_LEN: usize = 5;
/// Longest signed or unsigned 64-bit encoding.
pub const MAX_LONG_LEN: usize = 9;

/// Scratch space for one encoded varint.
type Scratch = [u8; MAX_LONG_LEN];

/// Writes the low `n` bytes of `v` big-endian into `out[..n]`.
fn put_be(out: &mut [u8], v: u64, n: usize) {
    out[..n].copy_from_slice(&v.to_be_bytes()[8 - n..]);
}

// ---------------------------------------------------------------------------
// Lengths
// ---------------------------------------------------------------------------

/// Encoded length of an unsigned 32-bit value.
pub fn uint_len(x: u32) -> usize {
    match x {
        0..0x80 => 1,
        0x80..0x4000 => 2,
        0x4000..0x20_0000 => 3,
        0x20_0000..0x1000_0000 => 4,
        _ => 5,
    }
}

/// Encoded length of an unsigned 64-bit value.
pub fn ulong_len(x: u64) -> usize {
    match x {
        0..0x1000_0000 => uint_len(x as u32),
        0x1000_0000..0x8_0000_0000 => 5,
        0x8_0000_0000..0x400_0000_0000 => 6,
        0x400_0000_0000..0x2_0000_0000_0000 => 7,
        0x2_0000_0000_0000..0x100_0000_0000_0000 => 8,
        _ => 9,
    }
}

/// Encoded length of a signed value.
pub fn int_len(x: i64) -> usize {
    if x >= 0 {
        match x {
            0..0x40 => 1,
            0x40..0x2000 => 2,
            0x2000..0x10_0000 => 3,
            0x10_0000..0x800_0000 => 4,
            0x800_0000..0x4_0000_0000 => 5,
            0x4_0000_0000..0x200_0000_0000 => 6,
            0x200_0000_0000..0x1_0000_0000_0000 => 7,
            0x1_0000_0000_0000..0x80_0000_0000_0000 => 8,
            _ => 9,
        }
    } else {
        match x {
            -0x40..0 => 1,
            -0x2000..-0x40 => 2,
            -0x10_0000..-0x2000 => 3,
            -0x800_0000..-0x10_0000 => 4,
            -0x4_0000_0000..-0x800_0000 => 5,
            -0x200_0000_0000..-0x4_0000_0000 => 6,
            -0x1_0000_0000_0000..-0x200_0000_0000 => 7,
            -0x80_0000_0000_0000..-0x1_0000_0000_0000 => 8,
            _ => 9,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoders into scratch space
// ---------------------------------------------------------------------------

fn encode_uint(x: u32, out: &mut Scratch) -> usize {
    let x = u64::from(x);
    let (n, v) = match x {
        0..0x80 => (1, x),
        0x80..0x4000 => (2, x + 0x8000),
        0x4000..0x20_0000 => (3, x + 0xC0_0000),
        0x20_0000..0x1000_0000 => (4, x + 0xE000_0000),
        _ => (5, x + 0xF0_0000_0000),
    };
    put_be(out, v, n);
    n
}

fn encode_ulong(x: u64, out: &mut Scratch) -> usize {
    let (n, v) = match x {
        0..0x1000_0000 => return encode_uint(x as u32, out),
        0x1000_0000..0x8_0000_0000 => (5, x + 0xF0_0000_0000),
        0x8_0000_0000..0x400_0000_0000 => (6, x + 0xF800_0000_0000),
        0x400_0000_0000..0x2_0000_0000_0000 => (7, x + 0xFC_0000_0000_0000),
        0x2_0000_0000_0000..0x100_0000_0000_0000 => (8, x + 0xFE00_0000_0000_0000),
        _ => {
            out[0] = 0xFF;
            put_be(&mut out[1..], x, 8);
            return 9;
        }
    };
    put_be(out, v, n);
    n
}

fn encode_int(x: i64, out: &mut Scratch) -> usize {
    let n = int_len(x);
    if n == 9 {
        out[0] = if x >= 0 { 0x7F } else { 0x80 };
        // x + 2^63 and x - 2^63 have the same bit pattern.
        put_be(&mut out[1..], (x as u64) ^ (1 << 63), 8);
        return 9;
    }
    const BIAS: [i64; 9] = [
        0,
        0,
        0x4000,
        0x60_0000,
        0x7000_0000,
        0x78_0000_0000,
        0x7C00_0000_0000,
        0x7E_0000_0000_0000,
        0x7F00_0000_0000_0000,
    ];
    let v = if x >= 0 { x + BIAS[n] } else { x - BIAS[n] };
    put_be(out, v as u64, n);
    n
}

// ---------------------------------------------------------------------------
// Cursor: writing
// ---------------------------------------------------------------------------

impl Cursor {
    /// Appends an unsigned 32-bit varint.
    pub fn marshal_uint(&mut self, x: u32) -> &mut Self {
        let mut s = Scratch::default();
        let n = encode_uint(x, &mut s);
        self.marshal_raw(&s[..n])
    }

    /// Appends an unsigned 64-bit varint.
    pub fn marshal_ulong(&mut self, x: u64) -> &mut Self {
        let mut s = Scratch::default();
        let n = encode_ulong(x, &mut s);
        self.marshal_raw(&s[..n])
    }

    /// Appends a signed varint of a 32-bit value.
    pub fn marshal_i32(&mut self, x: i32) -> &mut Self {
        self.marshal_i64(i64::from(x))
    }

    /// Appends a signed varint.
    pub fn marshal_i64(&mut self, x: i64) -> &mut Self {
        let mut s = Scratch::default();
        let n = encode_int(x, &mut s);
        self.marshal_raw(&s[..n])
    }

    /// Writes the shortest unsigned encoding of `x` so that it ends exactly
    /// at offset `p`, and returns its length. Bytes at `p` and after are
    /// not touched.
    ///
    /// # Panics
    /// Panics if `p` is past the stored length or fewer than the encoded
    /// length of bytes precede `p`.
    pub fn marshal_uint_back(&mut self, p: usize, x: u32) -> usize {
        let mut s = Scratch::default();
        let n = encode_uint(x, &mut s);
        self.overwrite_before(p, &s[..n]);
        n
    }

    /// Signed counterpart of [`marshal_uint_back`](Self::marshal_uint_back).
    ///
    /// # Panics
    /// Same conditions as `marshal_uint_back`.
    pub fn marshal_int_back(&mut self, p: usize, x: i64) -> usize {
        let mut s = Scratch::default();
        let n = encode_int(x, &mut s);
        self.overwrite_before(p, &s[..n]);
        n
    }

    // -----------------------------------------------------------------------
    // Cursor: reading
    // -----------------------------------------------------------------------

    /// Reads an unsigned 32-bit varint.
    ///
    /// The 5-byte form must hold a value no larger than `i32::MAX`; larger
    /// values are rejected as malformed.
    pub fn unmarshal_uint(&mut self) -> Result<u32, CodecError> {
        let start = self.position();
        let result = self.read_uint();
        if result.is_err() {
            self.set_position(start);
        }
        result
    }

    fn read_uint(&mut self) -> Result<u32, CodecError> {
        let b = u32::from(self.unmarshal_u8()?);
        match b >> 4 {
            0..=7 => Ok(b),
            8..=11 => Ok(((b & 0x3F) << 8) + self.unmarshal_be(1)? as u32),
            12 | 13 => Ok(((b & 0x1F) << 16) + self.unmarshal_be(2)? as u32),
            14 => Ok(((b & 0x0F) << 24) + self.unmarshal_be(3)? as u32),
            _ => {
                let v = self.unmarshal_be(4)? as u32;
                if v > i32::MAX as u32 {
                    return Err(CodecError::Malformed(format!(
                        "unsigned varint {v:#x} exceeds i32::MAX"
                    )));
                }
                Ok(v)
            }
        }
    }

    /// Reads an unsigned 64-bit varint.
    pub fn unmarshal_ulong(&mut self) -> Result<u64, CodecError> {
        let start = self.position();
        let result = self.read_ulong();
        if result.is_err() {
            self.set_position(start);
        }
        result
    }

    fn read_ulong(&mut self) -> Result<u64, CodecError> {
        let b = u64::from(self.unmarshal_u8()?);
        Ok(match b >> 4 {
            0..=7 => b,
            8..=11 => ((b & 0x3F) << 8) + self.unmarshal_be(1)?,
            12 | 13 => ((b & 0x1F) << 16) + self.unmarshal_be(2)?,
            14 => ((b & 0x0F) << 24) + self.unmarshal_be(3)?,
            _ => match b & 0x0F {
                0..=7 => ((b & 7) << 32) + self.unmarshal_be(4)?,
                8..=11 => ((b & 3) << 40) + self.unmarshal_be(5)?,
                12 | 13 => ((b & 1) << 48) + self.unmarshal_be(6)?,
                14 => self.unmarshal_be(7)?,
                _ => self.unmarshal_be(8)?,
            },
        })
    }

    /// Reads a signed varint into an `i64`.
    pub fn unmarshal_i64(&mut self) -> Result<i64, CodecError> {
        let start = self.position();
        let result = self.read_int();
        if result.is_err() {
            self.set_position(start);
        }
        result
    }

    /// Reads a signed varint and keeps its low 32 bits.
    ///
    /// Values written as 64-bit longs are truncated, the same as a peer
    /// that reads a long field into an int.
    pub fn unmarshal_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.unmarshal_i64()? as i32)
    }

    fn read_int(&mut self) -> Result<i64, CodecError> {
        let b = i64::from(self.unmarshal_u8()? as i8);
        let u = |c: &mut Self, n: usize| c.unmarshal_be(n).map(|v| v as i64);
        Ok(match (b >> 3) & 0x1F {
            0x00..=0x07 | 0x18..=0x1F => b,
            0x08..=0x0B => ((b - 0x40) << 8) + u(self, 1)?,
            0x14..=0x17 => ((b + 0x40) << 8) + u(self, 1)?,
            0x0C | 0x0D => ((b - 0x60) << 16) + u(self, 2)?,
            0x12 | 0x13 => ((b + 0x60) << 16) + u(self, 2)?,
            0x0E => ((b - 0x70) << 24) + u(self, 3)?,
            0x11 => ((b + 0x70) << 24) + u(self, 3)?,
            0x0F => match b & 7 {
                0..=3 => ((b - 0x78) << 32) + u(self, 4)?,
                4 | 5 => ((b - 0x7C) << 40) + u(self, 5)?,
                6 => u(self, 6)?,
                _ => {
                    let r = u(self, 7)?;
                    if r < 0x80_0000_0000_0000 {
                        r
                    } else {
                        ((r - 0x80_0000_0000_0000) << 8) + u(self, 1)?
                    }
                }
            },
            _ => match b & 7 {
                4..=7 => ((b + 0x78) << 32) + u(self, 4)?,
                2 | 3 => ((b + 0x7C) << 40) + u(self, 5)?,
                1 => (-0x1_0000_0000_0000i64) + u(self, 6)?,
                _ => {
                    let r = u(self, 7)?;
                    if r >= 0x80_0000_0000_0000 {
                        r - 0x100_0000_0000_0000
                    } else {
                        (r + 0x80_0000_0000_0000).wrapping_shl(8) + u(self, 1)?
                    }
                }
            },
        })
    }

    // -----------------------------------------------------------------------
    // Cursor: skipping
    // -----------------------------------------------------------------------

    /// Advances past one unsigned 32-bit varint without decoding it.
    pub fn skip_uint(&mut self) -> Result<(), CodecError> {
        let b = self.peek_u8()?;
        let n = match b >> 4 {
            0..=7 => 1,
            8..=11 => 2,
            12 | 13 => 3,
            14 => 4,
            _ => 5,
        };
        self.skip(n)
    }

    /// Advances past one unsigned 64-bit varint without decoding it.
    pub fn skip_ulong(&mut self) -> Result<(), CodecError> {
        let b = self.peek_u8()?;
        let n = match b >> 4 {
            0..=7 => 1,
            8..=11 => 2,
            12 | 13 => 3,
            14 => 4,
            _ => match b & 0x0F {
                0..=7 => 5,
                8..=11 => 6,
                12 | 13 => 7,
                14 => 8,
                _ => 9,
            },
        };
        self.skip(n)
    }

    /// Advances past one signed varint without decoding it.
    pub fn skip_int(&mut self) -> Result<(), CodecError> {
        let b = self.peek_u8()?;
        let n = match b >> 3 {
            0x00..=0x07 | 0x18..=0x1F => 1,
            0x08..=0x0B | 0x14..=0x17 => 2,
            0x0C | 0x0D | 0x12 | 0x13 => 3,
            0x0E | 0x11 => 4,
            0x0F => match b & 7 {
                0..=3 => 5,
                4 | 5 => 6,
                6 => 7,
                _ => 8 + self.peek_second_high_bit()?,
            },
            _ => match b & 7 {
                4..=7 => 5,
                2 | 3 => 6,
                1 => 7,
                _ => 9 - self.peek_second_high_bit()?,
            },
        };
        self.skip(n)
    }

    /// Top bit of the byte after the current one, which separates the 8- and
    /// 9-byte signed forms.
    fn peek_second_high_bit(&self) -> Result<usize, CodecError> {
        match self.remaining_slice().get(1) {
            Some(b) => Ok(usize::from(b >> 7)),
            None => Err(CodecError::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_i64(x: i64) -> Vec<u8> {
        let mut c = Cursor::new();
        c.marshal_i64(x);
        c.into_buffer().into_vec()
    }

    fn encode_u32(x: u32) -> Vec<u8> {
        let mut c = Cursor::new();
        c.marshal_uint(x);
        c.into_buffer().into_vec()
    }

    #[test]
    fn test_marshal_i64_small_values_single_byte() {
        assert_eq!(encode_i64(0), [0x00]);
        assert_eq!(encode_i64(5), [0x05]);
        assert_eq!(encode_i64(0x3F), [0x3F]);
        assert_eq!(encode_i64(-1), [0xFF]);
        assert_eq!(encode_i64(-0x40), [0xC0]);
    }

    #[test]
    fn test_marshal_i64_applies_bias() {
        assert_eq!(encode_i64(0x40), [0x40, 0x40]);
        assert_eq!(encode_i64(-0x41), [0xBF, 0xBF]);
        assert_eq!(encode_i64(0x2000), [0x60, 0x20, 0x00]);
        assert_eq!(encode_i64(123_456_789_012), [0x7C, 0x1C, 0xBE, 0x99, 0x1A, 0x14]);
    }

    #[test]
    fn test_marshal_i64_extremes_use_nine_bytes() {
        assert_eq!(
            encode_i64(i64::MAX),
            [0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(encode_i64(i64::MIN), [0x80, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_marshal_i32_five_byte_escape() {
        let mut c = Cursor::new();
        c.marshal_i32(i32::MAX).marshal_i32(i32::MIN);
        assert_eq!(
            c.as_slice(),
            [0x78, 0x7F, 0xFF, 0xFF, 0xFF, 0x87, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(c.unmarshal_i32().unwrap(), i32::MAX);
        assert_eq!(c.unmarshal_i32().unwrap(), i32::MIN);
    }

    #[test]
    fn test_unmarshal_i64_boundaries_round_trip() {
        let bounds: [i64; 9] = [
            0x40,
            0x2000,
            0x10_0000,
            0x800_0000,
            0x4_0000_0000,
            0x200_0000_0000,
            0x1_0000_0000_0000,
            0x80_0000_0000_0000,
            i64::MAX,
        ];
        for bound in bounds {
            for x in [bound - 1, bound, -bound, -bound - 1, bound.saturating_add(1)] {
                let bytes = encode_i64(x);
                assert_eq!(bytes.len(), int_len(x), "length of {x:#x}");
                let mut c = Cursor::from_slice(&bytes);
                assert_eq!(c.unmarshal_i64().unwrap(), x, "value {x:#x}");
                assert!(c.is_eof());
            }
        }
    }

    #[test]
    fn test_marshal_uint_length_transitions() {
        let cases = [
            (0x7F, 1),
            (0x80, 2),
            (0x3FFF, 2),
            (0x4000, 3),
            (0x1F_FFFF, 3),
            (0x20_0000, 4),
            (0xFFF_FFFF, 4),
            (0x1000_0000, 5),
        ];
        for (x, len) in cases {
            let bytes = encode_u32(x);
            assert_eq!(bytes.len(), len, "length of {x:#x}");
            assert_eq!(Cursor::from_slice(&bytes).unmarshal_uint().unwrap(), x);
        }
    }

    #[test]
    fn test_unmarshal_uint_rejects_negative_five_byte_form() {
        let mut c = Cursor::from_slice(&[0xF0, 0x80, 0x00, 0x00, 0x00]);
        let err = c.unmarshal_uint().unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_unmarshal_uint_truncated_rewinds() {
        let mut c = Cursor::from_slice(&[0xC1, 0x00]);
        assert!(c.unmarshal_uint().unwrap_err().is_eof());
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_ulong_round_trip_at_boundaries() {
        for shift in [7, 14, 21, 28, 35, 42, 49, 56, 63] {
            let bound = 1u64 << shift;
            for x in [bound - 1, bound] {
                let mut c = Cursor::new();
                c.marshal_ulong(x);
                assert_eq!(c.len(), ulong_len(x));
                assert_eq!(c.clone().unmarshal_ulong().unwrap(), x);
                c.skip_ulong().unwrap();
                assert!(c.is_eof());
            }
        }
        let mut c = Cursor::new();
        c.marshal_ulong(u64::MAX);
        assert_eq!(c.unmarshal_ulong().unwrap(), u64::MAX);
    }

    #[test]
    fn test_skip_int_matches_decode_length() {
        let samples = [
            0,
            -1,
            63,
            -64,
            8191,
            -8193,
            0x7FF_FFFF,
            -0x800_0001,
            0x3_FFFF_FFFF,
            0x7F_FFFF_FFFF_FFFF,
            0x80_0000_0000_0000,
            -0x80_0000_0000_0000,
            -0x80_0000_0000_0001,
            i64::MAX,
            i64::MIN,
        ];
        for x in samples {
            let bytes = encode_i64(x);
            let mut c = Cursor::from_slice(&bytes);
            c.skip_int().unwrap();
            assert_eq!(c.position(), bytes.len(), "skip of {x:#x}");
        }
    }

    #[test]
    fn test_marshal_uint_back_matches_forward_encoding() {
        for x in [0, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0xFFF_FFFF, 0x1000_0000, u32::MAX] {
            let mut c = Cursor::new();
            c.marshal_raw(&[0xEE; MAX_UINT_LEN]).marshal_u8(0xAA);
            let n = c.marshal_uint_back(MAX_UINT_LEN, x);
            assert_eq!(&c.as_slice()[MAX_UINT_LEN - n..MAX_UINT_LEN], encode_u32(x).as_slice());
            assert_eq!(c.as_slice()[MAX_UINT_LEN], 0xAA);
        }
    }

    #[test]
    fn test_marshal_int_back_matches_forward_encoding() {
        for x in [0, -1, 100, -100_000, i64::from(i32::MIN), i64::MIN, i64::MAX] {
            let mut c = Cursor::new();
            c.marshal_raw(&[0; MAX_LONG_LEN]);
            let n = c.marshal_int_back(MAX_LONG_LEN, x);
            assert_eq!(&c.as_slice()[MAX_LONG_LEN - n..], encode_i64(x).as_slice());
        }
    }
}
