//! Binary encoding for Beanwire.
//!
//! Leaf-first:
//!
//! - [`ByteBuffer`]: growable byte array with explicit length.
//! - [`Cursor`]: a buffer plus a read position, with raw read/write.
//! - [`varint`]: signed and unsigned variable-length integers, including
//!   the backwards "patch" writers used by the frame encoder.
//! - [`field`]: tags, wire types, value encodings and skip decoding.
//! - [`Bean`], [`RawBean`], [`DynBean`]: message values.
//! - [`frame`]: the `type · serial · length · payload` envelope.
//!
//! # Feature Flags
//!
//! - `json` (default): [`DynBean::to_json`] via `serde_json`.

mod bean;
mod cursor;
mod dynamic;
mod error;
pub mod field;
pub mod frame;
mod octets;
pub mod varint;

pub use bean::{AsAny, Bean, BeanType, RawBean};
pub use cursor::Cursor;
pub use dynamic::{DynBean, Value};
pub use error::CodecError;
pub use field::{KvType, Tag, WireType, MAX_FIELD_ID, MAX_NESTING};
pub use frame::{decode_body, encode_frame, EncodedFrame, FrameHeader};
pub use octets::ByteBuffer;
