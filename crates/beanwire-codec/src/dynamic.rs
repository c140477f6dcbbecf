//! Schema-less beans.
//!
//! [`DynBean`] stores an ordered map from field id to [`Value`] and uses
//! the same tag mechanics as compiled beans, except the wire type of each
//! field is chosen from the value at encode time. Decoding any bean body
//! into a `DynBean` never fails on unknown ids, which makes it the
//! catch-all for inspection and tooling.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq, SerializeTuple};
use serde::{Serialize, Serializer};

use crate::field::{list_subtype, map_subtype, MAX_PREALLOC, SUBTYPE_DOUBLE, SUBTYPE_FLOAT};
use crate::{Bean, CodecError, Cursor, KvType, WireType, MAX_FIELD_ID};

/// One dynamically typed field value.
///
/// Lists and maps hold scalar, string, or bean elements. A list or map
/// nested directly inside another has no wire representation and is
/// written as an empty byte string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
    Bean(DynBean),
    Float(f32),
    Double(f64),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Element kind used when this value sits inside a list or map.
    pub fn kv_type(&self) -> KvType {
        match self {
            Self::Int(_) => KvType::Int,
            Self::Bean(_) => KvType::Bean,
            Self::Float(_) => KvType::Float,
            Self::Double(_) => KvType::Double,
            Self::Bytes(_) | Self::Str(_) | Self::List(_) | Self::Map(_) => KvType::Bytes,
        }
    }

    /// `true` for values that a field encoding omits.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Int(v) => *v == 0,
            Self::Bytes(v) => v.is_empty(),
            Self::Str(v) => v.is_empty(),
            Self::Bean(v) => v.is_empty(),
            Self::Float(v) => *v == 0.0,
            Self::Double(v) => *v == 0.0,
            Self::List(v) => v.is_empty(),
            Self::Map(v) => v.is_empty(),
        }
    }

    fn marshal_kv(&self, kv: KvType, out: &mut Cursor) {
        match kv {
            KvType::Int => {
                let v = match self {
                    Self::Int(v) => *v,
                    Self::Float(v) => *v as i64,
                    Self::Double(v) => *v as i64,
                    _ => 0,
                };
                out.marshal_i64(v);
            }
            KvType::Bytes => match self {
                Self::Bytes(v) => {
                    out.marshal_bytes(v);
                }
                Self::Str(v) => {
                    out.marshal_str(v);
                }
                _ => {
                    out.marshal_uint(0);
                }
            },
            KvType::Bean => match self {
                Self::Bean(v) => v.marshal(out),
                _ => {
                    out.marshal_u8(0);
                }
            },
            KvType::Float => {
                out.marshal_f32(self.as_f64() as f32);
            }
            KvType::Double => {
                out.marshal_f64(self.as_f64());
            }
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => f64::from(*v),
            Self::Double(v) => *v,
            _ => 0.0,
        }
    }

    fn unmarshal_kv(kv: KvType, input: &mut Cursor) -> Result<Self, CodecError> {
        Ok(match kv {
            KvType::Int => Self::Int(input.unmarshal_i64()?),
            KvType::Bytes => Self::Bytes(input.unmarshal_bytes()?),
            KvType::Bean => {
                let mut bean = DynBean::default();
                input.nested(|c| bean.unmarshal(c))?;
                Self::Bean(bean)
            }
            KvType::Float => Self::Float(input.unmarshal_f32()?),
            KvType::Double => Self::Double(input.unmarshal_f64()?),
        })
    }

    /// Decodes one field value of the given wire type.
    pub fn unmarshal_var(wire: WireType, input: &mut Cursor) -> Result<Self, CodecError> {
        match wire {
            WireType::Int => Ok(Self::Int(input.unmarshal_i64()?)),
            WireType::Bytes => Ok(Self::Bytes(input.unmarshal_bytes()?)),
            WireType::Bean => Self::unmarshal_kv(KvType::Bean, input),
            WireType::Ext => match input.unmarshal_u8()? {
                SUBTYPE_FLOAT => Ok(Self::Float(input.unmarshal_f32()?)),
                SUBTYPE_DOUBLE => Ok(Self::Double(input.unmarshal_f64()?)),
                s if s < 0x40 => {
                    let kv = KvType::from_code(s & 7)?;
                    let n = input.unmarshal_uint()? as usize;
                    let mut list = Vec::with_capacity(n.min(MAX_PREALLOC));
                    for _ in 0..n {
                        list.push(Self::unmarshal_kv(kv, input)?);
                    }
                    Ok(Self::List(list))
                }
                s => {
                    let key = KvType::from_code((s >> 3) & 7)?;
                    let value = KvType::from_code(s & 7)?;
                    let n = input.unmarshal_uint()? as usize;
                    let mut map = Vec::with_capacity(n.min(MAX_PREALLOC));
                    for _ in 0..n {
                        let k = Self::unmarshal_kv(key, input)?;
                        let v = Self::unmarshal_kv(value, input)?;
                        map.push((k, v));
                    }
                    Ok(Self::Map(map))
                }
            },
        }
    }

    /// Appends field `id` holding this value, or nothing for a default
    /// value.
    ///
    /// # Panics
    /// Panics if `id` is outside `1..=MAX_FIELD_ID`.
    pub fn marshal_var(&self, id: u32, out: &mut Cursor) {
        match self {
            Self::Int(v) => {
                out.marshal_i64_field(id, *v);
            }
            Self::Bytes(v) => {
                out.marshal_bytes_field(id, v);
            }
            Self::Str(v) => {
                out.marshal_str_field(id, v);
            }
            Self::Bean(v) => {
                out.marshal_bean_field(id, v);
            }
            Self::Float(v) => {
                out.marshal_f32_field(id, *v);
            }
            Self::Double(v) => {
                out.marshal_f64_field(id, *v);
            }
            Self::List(items) => {
                if let Some(first) = items.first() {
                    let kv = first.kv_type();
                    out.marshal_tag(id, WireType::Ext)
                        .marshal_u8(list_subtype(kv))
                        .marshal_uint(items.len() as u32);
                    for item in items {
                        item.marshal_kv(kv, out);
                    }
                }
            }
            Self::Map(entries) => {
                if let Some((k0, v0)) = entries.first() {
                    let (kk, vk) = (k0.kv_type(), v0.kv_type());
                    out.marshal_tag(id, WireType::Ext)
                        .marshal_u8(map_subtype(kk, vk))
                        .marshal_uint(entries.len() as u32);
                    for (k, v) in entries {
                        k.marshal_kv(kk, out);
                        v.marshal_kv(vk, out);
                    }
                }
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

value_from! {
    i64 => Int,
    i32 => Int,
    Vec<u8> => Bytes,
    String => Str,
    &str => Str,
    DynBean => Bean,
    f32 => Float,
    f64 => Double,
    Vec<Value> => List,
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(v) => s.serialize_i64(*v),
            Self::Bytes(v) => s.serialize_bytes(v),
            Self::Str(v) => s.serialize_str(v),
            Self::Bean(v) => v.serialize(s),
            Self::Float(v) => s.serialize_f32(*v),
            Self::Double(v) => s.serialize_f64(*v),
            Self::List(items) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut seq = s.serialize_seq(Some(entries.len()))?;
                for (k, v) in entries {
                    seq.serialize_element(&Pair(k, v))?;
                }
                seq.end()
            }
        }
    }
}

/// A map entry rendered as a two-element array.
struct Pair<'a>(&'a Value, &'a Value);

impl Serialize for Pair<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut t = s.serialize_tuple(2)?;
        t.serialize_element(self.0)?;
        t.serialize_element(self.1)?;
        t.end()
    }
}

// ---------------------------------------------------------------------------
// DynBean
// ---------------------------------------------------------------------------

/// A bean whose fields are discovered at runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynBean {
    type_id: u32,
    fields: BTreeMap<u32, Value>,
}

impl DynBean {
    /// Creates an empty dynamic bean that will report `type_id`.
    pub fn new(type_id: u32) -> Self {
        Self {
            type_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn set_type_id(&mut self, type_id: u32) {
        self.type_id = type_id;
    }

    pub fn get(&self, id: u32) -> Option<&Value> {
        self.fields.get(&id)
    }

    /// Stores `value` under field `id`, returning the previous value.
    ///
    /// # Errors
    /// [`CodecError::InvalidFieldId`] if `id` is 0 or above
    /// [`MAX_FIELD_ID`].
    pub fn set(&mut self, id: u32, value: impl Into<Value>) -> Result<Option<Value>, CodecError> {
        if !(1..=MAX_FIELD_ID).contains(&id) {
            return Err(CodecError::InvalidFieldId(id));
        }
        Ok(self.fields.insert(id, value.into()))
    }

    pub fn remove(&mut self, id: u32) -> Option<Value> {
        self.fields.remove(&id)
    }

    /// Fields in ascending id order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if no field would be written.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Value::is_default)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Renders the bean as JSON, fields keyed by id and the type under
    /// `"t"`.
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Bean for DynBean {
    fn bean_type(&self) -> u32 {
        self.type_id
    }

    fn marshal(&self, out: &mut Cursor) {
        for (id, value) in &self.fields {
            value.marshal_var(*id, out);
        }
        out.marshal_u8(0);
    }

    fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
        self.fields.clear();
        while let Some(tag) = input.unmarshal_tag()? {
            if tag.id > MAX_FIELD_ID {
                input.skip_var(tag.wire)?;
                continue;
            }
            let value = Value::unmarshal_var(tag.wire, input)?;
            self.fields.insert(tag.id, value);
        }
        Ok(())
    }
}

impl Serialize for DynBean {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("t", &self.type_id)?;
        for (id, value) in &self.fields {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(bean: &DynBean) -> DynBean {
        let mut c = Cursor::new();
        bean.marshal(&mut c);
        let mut decoded = DynBean::new(bean.type_id());
        decoded.unmarshal(&mut c).unwrap();
        assert!(c.is_eof());
        decoded
    }

    #[test]
    fn test_marshal_empty_is_single_terminator() {
        let mut c = Cursor::new();
        DynBean::new(0).marshal(&mut c);
        assert_eq!(c.as_slice(), [0]);
    }

    #[test]
    fn test_marshal_omits_default_values() {
        let mut bean = DynBean::new(0);
        bean.set(1, 0i64).unwrap();
        bean.set(2, "").unwrap();
        bean.set(3, DynBean::new(0)).unwrap();
        bean.set(4, Value::List(Vec::new())).unwrap();
        bean.set(5, 0.0f64).unwrap();
        let mut c = Cursor::new();
        bean.marshal(&mut c);
        assert_eq!(c.as_slice(), [0]);
    }

    #[test]
    fn test_marshal_int_and_string_layout() {
        let mut bean = DynBean::new(0);
        bean.set(1, 5i64).unwrap();
        bean.set(2, "hi").unwrap();
        let mut c = Cursor::new();
        bean.marshal(&mut c);
        assert_eq!(c.as_slice(), [0x04, 0x05, 0x09, 2, b'h', b'i', 0x00]);
    }

    #[test]
    fn test_round_trip_nested_collections() {
        let mut inner = DynBean::new(0);
        inner.set(1, 42i64).unwrap();
        inner.set(100, Value::List(vec![1.5f64.into(), 2.5f64.into()])).unwrap();

        let mut bean = DynBean::new(12);
        bean.set(1, Value::List(vec![inner.clone().into(), inner.clone().into()])).unwrap();
        bean.set(2, Value::Map(vec![(7i64.into(), Value::Bytes(b"seven".to_vec()))])).unwrap();
        bean.set(3, 1.25f32).unwrap();
        bean.set(4, inner.clone()).unwrap();

        let decoded = round_trip(&bean);
        assert_eq!(decoded.get(1), bean.get(1));
        assert_eq!(decoded.get(2), bean.get(2));
        assert_eq!(decoded.get(3), Some(&Value::Float(1.25)));
        assert_eq!(decoded.get(4), Some(&Value::Bean(inner)));
    }

    #[test]
    fn test_strings_decode_as_bytes() {
        let mut bean = DynBean::new(0);
        bean.set(1, "abc").unwrap();
        let decoded = round_trip(&bean);
        assert_eq!(decoded.get(1), Some(&Value::Bytes(b"abc".to_vec())));
    }

    #[test]
    fn test_mixed_list_coerces_to_first_kind() {
        let mut bean = DynBean::new(0);
        bean.set(1, Value::List(vec![1i64.into(), 2.9f64.into()])).unwrap();
        let decoded = round_trip(&bean);
        assert_eq!(decoded.get(1), Some(&Value::List(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn test_set_rejects_out_of_range_id() {
        let mut bean = DynBean::new(0);
        assert!(matches!(bean.set(0, 1i64), Err(CodecError::InvalidFieldId(0))));
        assert!(matches!(bean.set(191, 1i64), Err(CodecError::InvalidFieldId(191))));
        assert!(bean.set(190, 1i64).unwrap().is_none());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_to_json_keys_fields_by_id() {
        let mut bean = DynBean::new(3);
        bean.set(1, 5i64).unwrap();
        bean.set(2, "x").unwrap();
        let json: serde_json::Value = serde_json::from_str(&bean.to_json().unwrap()).unwrap();
        assert_eq!(json["t"], 3);
        assert_eq!(json["1"], 5);
        assert_eq!(json["2"], "x");
    }
}
