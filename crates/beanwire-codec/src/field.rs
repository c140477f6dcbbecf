//! Field tags, value encodings, and skip decoding.
//!
//! A bean body is a run of `(tag, value)` pairs closed by a zero byte:
//!
//! ```text
//!  tag (id <= 62)     [id:6][wire:2]
//!  tag (63..=190)     [111111][wire:2] [id - 63]
//!  wire 0  signed varint
//!  wire 1  uint length, bytes
//!  wire 2  nested bean body (own terminator)
//!  wire 3  subtype byte, then:
//!            8          f32, 4 bytes big-endian
//!            9          f64, 8 bytes big-endian
//!            00000vvv   list:  uint count, count * value(kv v)
//!            01kkkvvv   map:   uint count, count * (key(kv k), value(kv v))
//! ```
//!
//! Every encoding has a matching `skip_*` that consumes exactly the same
//! bytes without building the value. The typed `read_*` helpers are what
//! bean implementations call: they accept the wire type found in the tag,
//! coerce between numeric encodings, and skip anything they cannot use.

use crate::{Bean, CodecError, Cursor};

/// Largest field id a tag can carry in this protocol version.
pub const MAX_FIELD_ID: u32 = 190;

/// Deepest chain of nested beans a decoder or skipper will follow.
pub const MAX_NESTING: u32 = 64;

/// Largest field id that fits the one-byte tag form.
pub const SHORT_TAG_MAX_ID: u32 = 62;

/// Wire-3 subtype of a 4-byte float.
pub const SUBTYPE_FLOAT: u8 = 8;
/// Wire-3 subtype of an 8-byte double.
pub const SUBTYPE_DOUBLE: u8 = 9;
/// Wire-3 subtypes at or above this value are maps.
const SUBTYPE_MAP: u8 = 0x40;

/// Escape prefix of the two-byte tag form.
const LONG_TAG_PREFIX: u8 = 0xFC;

/// Collection and map sizes above this are not pre-allocated.
pub(crate) const MAX_PREALLOC: usize = 0x10000;

/// The 2-bit wire type carried in every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// Signed varint.
    Int = 0,
    /// Length-prefixed bytes or string.
    Bytes = 1,
    /// Nested tag-terminated bean.
    Bean = 2,
    /// Subtype byte, then float, double, list, or map.
    Ext = 3,
}

impl WireType {
    /// Decodes the low two bits of a tag byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Int,
            1 => Self::Bytes,
            2 => Self::Bean,
            _ => Self::Ext,
        }
    }
}

/// Element kind inside lists and maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvType {
    Int = 0,
    Bytes = 1,
    Bean = 2,
    Float = 4,
    Double = 5,
}

impl KvType {
    /// Decodes a 3-bit KV code. Codes 3, 6 and 7 are unassigned.
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Int),
            1 => Ok(Self::Bytes),
            2 => Ok(Self::Bean),
            4 => Ok(Self::Float),
            5 => Ok(Self::Double),
            _ => Err(CodecError::Malformed(format!("unknown kv type {code}"))),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Subtype byte of a list whose elements have kind `value`.
pub fn list_subtype(value: KvType) -> u8 {
    value.code()
}

/// Subtype byte of a map with the given key and value kinds.
pub fn map_subtype(key: KvType, value: KvType) -> u8 {
    SUBTYPE_MAP | (key.code() << 3) | value.code()
}

/// A decoded field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub id: u32,
    pub wire: WireType,
}

/// Encoded size of a tag for `id`.
pub fn tag_len(id: u32) -> usize {
    if id <= SHORT_TAG_MAX_ID { 1 } else { 2 }
}

/// Byte length of `s` in the wire string encoding.
pub fn str_wire_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|c| match c {
            0..0x80 => 1,
            0x80..0x800 => 2,
            _ => 3,
        })
        .sum()
}

impl Cursor {
    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// Appends the tag for field `id` with wire type `wire`.
    ///
    /// # Panics
    /// Panics if `id` is 0 or above [`MAX_FIELD_ID`]. Field ids are fixed by
    /// the message schema, so an out-of-range id is a programming error.
    pub fn marshal_tag(&mut self, id: u32, wire: WireType) -> &mut Self {
        assert!(
            (1..=MAX_FIELD_ID).contains(&id),
            "field id {id} out of range 1..={MAX_FIELD_ID}"
        );
        let wire = wire as u8;
        if id <= SHORT_TAG_MAX_ID {
            self.marshal_u8(((id as u8) << 2) | wire)
        } else {
            self.marshal_u8(LONG_TAG_PREFIX | wire)
                .marshal_u8((id - SHORT_TAG_MAX_ID - 1) as u8)
        }
    }

    /// Reads the next tag, or `None` at the bean terminator.
    pub fn unmarshal_tag(&mut self) -> Result<Option<Tag>, CodecError> {
        let b = self.unmarshal_u8()?;
        let wire = WireType::from_bits(b);
        let mut id = u32::from(b >> 2);
        if id == SHORT_TAG_MAX_ID + 1 {
            id += u32::from(self.unmarshal_u8()?);
        }
        Ok((id != 0).then_some(Tag { id, wire }))
    }

    // -----------------------------------------------------------------------
    // Bytes and strings
    // -----------------------------------------------------------------------

    /// Appends a length-prefixed byte string.
    pub fn marshal_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.marshal_uint(data.len() as u32).marshal_raw(data)
    }

    /// Appends a length-prefixed string, one to three bytes per UTF-16 unit.
    pub fn marshal_str(&mut self, s: &str) -> &mut Self {
        self.marshal_uint(str_wire_len(s) as u32);
        for c in s.encode_utf16() {
            match c {
                0..0x80 => {
                    self.marshal_u8(c as u8);
                }
                0x80..0x800 => {
                    self.marshal_u8(0xC0 | (c >> 6) as u8)
                        .marshal_u8(0x80 | (c & 0x3F) as u8);
                }
                _ => {
                    self.marshal_u8(0xE0 | (c >> 12) as u8)
                        .marshal_u8(0x80 | ((c >> 6) & 0x3F) as u8)
                        .marshal_u8(0x80 | (c & 0x3F) as u8);
                }
            }
        }
        self
    }

    /// Borrows the next length-prefixed byte string.
    pub fn unmarshal_bytes_ref(&mut self) -> Result<&[u8], CodecError> {
        let start = self.position();
        let n = self.unmarshal_uint()? as usize;
        if self.remaining() < n {
            self.set_position(start);
            return Err(CodecError::Eof);
        }
        self.unmarshal_raw(n)
    }

    pub fn unmarshal_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        Ok(self.unmarshal_bytes_ref()?.to_vec())
    }

    /// Reads a string written by [`marshal_str`](Self::marshal_str).
    ///
    /// Unpaired surrogates decode to U+FFFD.
    pub fn unmarshal_string(&mut self) -> Result<String, CodecError> {
        let raw = self.unmarshal_bytes_ref()?;
        let mut units = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            let b = u16::from(raw[i]);
            let (unit, n) = if b < 0x80 {
                (b, 1)
            } else if b < 0xE0 {
                let b1 = continuation(raw, i + 1)?;
                (((b & 0x1F) << 6) | b1, 2)
            } else {
                let b1 = continuation(raw, i + 1)?;
                let b2 = continuation(raw, i + 2)?;
                (((b & 0x0F) << 12) | (b1 << 6) | b2, 3)
            };
            units.push(unit);
            i += n;
        }
        Ok(String::from_utf16_lossy(&units))
    }

    pub fn skip_bytes(&mut self) -> Result<(), CodecError> {
        self.unmarshal_bytes_ref().map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Nested beans
    // -----------------------------------------------------------------------

    /// Appends field `id` holding `bean`, or nothing if the bean encodes to
    /// an empty body.
    pub fn marshal_bean_field(&mut self, id: u32, bean: &dyn Bean) -> &mut Self {
        let start = self.len();
        self.marshal_tag(id, WireType::Bean);
        bean.marshal(self);
        if self.len() - start <= tag_len(id) + 1 {
            self.buffer_mut().resize(start);
        }
        self
    }

    /// Appends a float field, omitted when zero.
    pub fn marshal_f32_field(&mut self, id: u32, v: f32) -> &mut Self {
        if v != 0.0 {
            self.marshal_tag(id, WireType::Ext)
                .marshal_u8(SUBTYPE_FLOAT)
                .marshal_f32(v);
        }
        self
    }

    /// Appends a double field, omitted when zero.
    pub fn marshal_f64_field(&mut self, id: u32, v: f64) -> &mut Self {
        if v != 0.0 {
            self.marshal_tag(id, WireType::Ext)
                .marshal_u8(SUBTYPE_DOUBLE)
                .marshal_f64(v);
        }
        self
    }

    /// Appends an integer field, omitted when zero.
    pub fn marshal_i64_field(&mut self, id: u32, v: i64) -> &mut Self {
        if v != 0 {
            self.marshal_tag(id, WireType::Int).marshal_i64(v);
        }
        self
    }

    /// Appends a string field, omitted when empty.
    pub fn marshal_str_field(&mut self, id: u32, s: &str) -> &mut Self {
        if !s.is_empty() {
            self.marshal_tag(id, WireType::Bytes).marshal_str(s);
        }
        self
    }

    /// Appends a byte-string field, omitted when empty.
    pub fn marshal_bytes_field(&mut self, id: u32, data: &[u8]) -> &mut Self {
        if !data.is_empty() {
            self.marshal_tag(id, WireType::Bytes).marshal_bytes(data);
        }
        self
    }

    // -----------------------------------------------------------------------
    // Skipping
    // -----------------------------------------------------------------------

    /// Skips one value of the given wire type.
    pub fn skip_var(&mut self, wire: WireType) -> Result<(), CodecError> {
        match wire {
            WireType::Int => self.skip_int(),
            WireType::Bytes => self.skip_bytes(),
            WireType::Bean => self.skip_bean(),
            WireType::Ext => {
                let subtype = self.unmarshal_u8()?;
                self.skip_ext(subtype)
            }
        }
    }

    /// Skips a wire-3 value whose subtype byte was already read.
    pub fn skip_ext(&mut self, subtype: u8) -> Result<(), CodecError> {
        match subtype {
            SUBTYPE_FLOAT => self.skip(4),
            SUBTYPE_DOUBLE => self.skip(8),
            s if s < SUBTYPE_MAP => {
                let value = KvType::from_code(s & 7)?;
                for _ in 0..self.unmarshal_uint()? {
                    self.skip_kv(value)?;
                }
                Ok(())
            }
            s => {
                let key = KvType::from_code((s >> 3) & 7)?;
                let value = KvType::from_code(s & 7)?;
                for _ in 0..self.unmarshal_uint()? {
                    self.skip_kv(key)?;
                    self.skip_kv(value)?;
                }
                Ok(())
            }
        }
    }

    /// Skips one collection element of the given kind.
    pub fn skip_kv(&mut self, kv: KvType) -> Result<(), CodecError> {
        match kv {
            KvType::Int => self.skip_int(),
            KvType::Bytes => self.skip_bytes(),
            KvType::Bean => self.skip_bean(),
            KvType::Float => self.skip(4),
            KvType::Double => self.skip(8),
        }
    }

    /// Skips a bean body up to and including its terminator.
    ///
    /// Counts as one nesting level; see [`Cursor::nested`].
    pub fn skip_bean(&mut self) -> Result<(), CodecError> {
        self.nested(|c| {
            while let Some(tag) = c.unmarshal_tag()? {
                c.skip_var(tag.wire)?;
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Typed field readers
    // -----------------------------------------------------------------------

    /// Reads an integer field. Floats and doubles are truncated; any other
    /// encoding is skipped and yields 0.
    pub fn read_i64(&mut self, wire: WireType) -> Result<i64, CodecError> {
        match wire {
            WireType::Int => self.unmarshal_i64(),
            WireType::Ext => match self.unmarshal_u8()? {
                SUBTYPE_FLOAT => Ok(self.unmarshal_f32()? as i64),
                SUBTYPE_DOUBLE => Ok(self.unmarshal_f64()? as i64),
                subtype => self.skip_ext(subtype).map(|_| 0),
            },
            other => self.skip_var(other).map(|_| 0),
        }
    }

    /// 32-bit variant of [`read_i64`](Self::read_i64).
    pub fn read_i32(&mut self, wire: WireType) -> Result<i32, CodecError> {
        match wire {
            WireType::Int => self.unmarshal_i32(),
            WireType::Ext => match self.unmarshal_u8()? {
                SUBTYPE_FLOAT => Ok(self.unmarshal_f32()? as i32),
                SUBTYPE_DOUBLE => Ok(self.unmarshal_f64()? as i32),
                subtype => self.skip_ext(subtype).map(|_| 0),
            },
            other => self.skip_var(other).map(|_| 0),
        }
    }

    /// Reads a double field. Floats widen, integers convert; any other
    /// encoding is skipped and yields 0.
    pub fn read_f64(&mut self, wire: WireType) -> Result<f64, CodecError> {
        match wire {
            WireType::Int => Ok(self.unmarshal_i64()? as f64),
            WireType::Ext => match self.unmarshal_u8()? {
                SUBTYPE_FLOAT => Ok(f64::from(self.unmarshal_f32()?)),
                SUBTYPE_DOUBLE => self.unmarshal_f64(),
                subtype => self.skip_ext(subtype).map(|_| 0.0),
            },
            other => self.skip_var(other).map(|_| 0.0),
        }
    }

    /// Reads a float field with the same coercions as `read_f64`.
    pub fn read_f32(&mut self, wire: WireType) -> Result<f32, CodecError> {
        Ok(self.read_f64(wire)? as f32)
    }

    /// Reads a byte-string field; any other encoding is skipped.
    pub fn read_bytes(&mut self, wire: WireType) -> Result<Vec<u8>, CodecError> {
        if wire == WireType::Bytes {
            self.unmarshal_bytes()
        } else {
            self.skip_var(wire).map(|_| Vec::new())
        }
    }

    /// Reads a string field; any other encoding is skipped.
    pub fn read_string(&mut self, wire: WireType) -> Result<String, CodecError> {
        if wire == WireType::Bytes {
            self.unmarshal_string()
        } else {
            self.skip_var(wire).map(|_| String::new())
        }
    }

    /// Decodes a nested bean field into `bean`; any other encoding is
    /// skipped and `bean` is left as it was.
    pub fn read_bean(&mut self, bean: &mut dyn Bean, wire: WireType) -> Result<(), CodecError> {
        if wire == WireType::Bean {
            self.nested(|c| bean.unmarshal(c))
        } else {
            self.skip_var(wire)
        }
    }

    /// Reads a collection element as an integer.
    pub fn read_i64_kv(&mut self, kv: KvType) -> Result<i64, CodecError> {
        match kv {
            KvType::Int => self.unmarshal_i64(),
            KvType::Float => Ok(self.unmarshal_f32()? as i64),
            KvType::Double => Ok(self.unmarshal_f64()? as i64),
            other => self.skip_kv(other).map(|_| 0),
        }
    }

    /// Reads a collection element as a double.
    pub fn read_f64_kv(&mut self, kv: KvType) -> Result<f64, CodecError> {
        match kv {
            KvType::Int => Ok(self.unmarshal_i64()? as f64),
            KvType::Float => Ok(f64::from(self.unmarshal_f32()?)),
            KvType::Double => self.unmarshal_f64(),
            other => self.skip_kv(other).map(|_| 0.0),
        }
    }

    /// Reads a collection element as a string.
    pub fn read_string_kv(&mut self, kv: KvType) -> Result<String, CodecError> {
        if kv == KvType::Bytes {
            self.unmarshal_string()
        } else {
            self.skip_kv(kv).map(|_| String::new())
        }
    }

    /// Reads a collection element as bytes.
    pub fn read_bytes_kv(&mut self, kv: KvType) -> Result<Vec<u8>, CodecError> {
        if kv == KvType::Bytes {
            self.unmarshal_bytes()
        } else {
            self.skip_kv(kv).map(|_| Vec::new())
        }
    }
}

fn continuation(raw: &[u8], i: usize) -> Result<u16, CodecError> {
    raw.get(i)
        .map(|b| u16::from(b & 0x3F))
        .ok_or_else(|| CodecError::Malformed("truncated string character".into()))
}
