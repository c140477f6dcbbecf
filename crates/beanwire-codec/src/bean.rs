//! The [`Bean`] trait: one message type with a stable wire id.
//!
//! Every concrete message implements `Bean` by writing its non-default
//! fields as `(tag, value)` pairs followed by a zero byte, and reading them
//! back in a loop that skips whatever it does not recognize:
//!
//! ```
//! use beanwire_codec::{Bean, BeanType, CodecError, Cursor, WireType};
//!
//! #[derive(Debug, Default)]
//! struct Ping {
//!     nonce: i64,
//! }
//!
//! impl Bean for Ping {
//!     fn bean_type(&self) -> u32 {
//!         Self::TYPE
//!     }
//!
//!     fn marshal(&self, out: &mut Cursor) {
//!         out.marshal_i64_field(1, self.nonce).marshal_u8(0);
//!     }
//!
//!     fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
//!         while let Some(tag) = input.unmarshal_tag()? {
//!             match tag.id {
//!                 1 => self.nonce = input.read_i64(tag.wire)?,
//!                 _ => input.skip_var(tag.wire)?,
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl BeanType for Ping {
//!     const TYPE: u32 = 3;
//! }
//! ```

use std::any::Any;
use std::fmt;

use crate::{CodecError, Cursor};

/// Type-erasure helper so `Box<dyn Bean>` can be downcast.
///
/// Implemented for every `'static` type; bean authors never implement it.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A message that can be written to and read from the wire.
pub trait Bean: AsAny + Send + fmt::Debug {
    /// Wire type id. 0 is reserved for the dynamic bean.
    fn bean_type(&self) -> u32;

    /// Expected encoded size, used to size the scratch buffer.
    fn init_size(&self) -> usize {
        16
    }

    /// Largest payload accepted for this type, or `None` to use the
    /// dispatcher's configured default.
    fn max_size(&self) -> Option<usize> {
        None
    }

    /// Appends the bean body, including the terminating zero byte.
    fn marshal(&self, out: &mut Cursor);

    /// Reads a bean body up to and including its terminator.
    ///
    /// Unknown field ids must be skipped with [`Cursor::skip_var`].
    fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError>;
}

/// A bean with a compile-time type id and an empty default value, which
/// is everything a registry needs to construct it.
pub trait BeanType: Bean + Default + 'static {
    const TYPE: u32;
}

impl dyn Bean {
    /// Returns `true` if the boxed bean is a `T`.
    pub fn is<T: Bean + 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Bean + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Bean + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }

    /// Converts a boxed bean into its concrete type, giving it back
    /// unchanged if it is something else.
    pub fn downcast<T: Bean + 'static>(self: Box<Self>) -> Result<Box<T>, Box<dyn Bean>> {
        if self.is::<T>() {
            match self.into_any().downcast::<T>() {
                Ok(bean) => Ok(bean),
                Err(_) => unreachable!("type checked above"),
            }
        } else {
            Err(self)
        }
    }
}

// ---------------------------------------------------------------------------
// RawBean
// ---------------------------------------------------------------------------

/// An already-encoded bean body carried verbatim.
///
/// Lets a process forward a message whose schema it does not know: the
/// payload bytes are written out unchanged under the original type id.
/// When decoded from a frame it takes every byte up to the frame's end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBean {
    pub type_id: u32,
    pub payload: Vec<u8>,
}

impl RawBean {
    pub fn new(type_id: u32, payload: Vec<u8>) -> Self {
        Self { type_id, payload }
    }
}

impl Bean for RawBean {
    fn bean_type(&self) -> u32 {
        self.type_id
    }

    fn init_size(&self) -> usize {
        self.payload.len()
    }

    fn marshal(&self, out: &mut Cursor) {
        out.marshal_raw(&self.payload);
    }

    fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
        self.payload = input.remaining_slice().to_vec();
        input.set_position(input.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Empty;

    impl Bean for Empty {
        fn bean_type(&self) -> u32 {
            9
        }

        fn marshal(&self, out: &mut Cursor) {
            out.marshal_u8(0);
        }

        fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
            input.skip_bean()
        }
    }

    #[test]
    fn test_downcast_to_concrete_type() {
        let bean: Box<dyn Bean> = Box::new(RawBean::new(4, vec![1, 2]));
        assert!(bean.is::<RawBean>());
        assert!(bean.downcast_ref::<Empty>().is_none());
        let raw = bean.downcast::<RawBean>().unwrap();
        assert_eq!(raw.payload, [1, 2]);
    }

    #[test]
    fn test_downcast_wrong_type_returns_original() {
        let bean: Box<dyn Bean> = Box::new(Empty);
        let back = bean.downcast::<RawBean>().unwrap_err();
        assert_eq!(back.bean_type(), 9);
    }

    #[test]
    fn test_raw_bean_copies_payload_verbatim() {
        let raw = RawBean::new(77, vec![0x04, 0x05, 0x00]);
        let mut c = Cursor::new();
        raw.marshal(&mut c);
        assert_eq!(c.as_slice(), [0x04, 0x05, 0x00]);

        let mut decoded = RawBean::new(77, Vec::new());
        decoded.unmarshal(&mut c).unwrap();
        assert_eq!(decoded, raw);
        assert!(c.is_eof());
    }
}
