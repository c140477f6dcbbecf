//! The frame envelope: `type · serial · length · payload`.
//!
//! ```text
//! +-------------+---------------+---------------+----------------+
//! | uint type   | int serial    | uint length   | length bytes   |
//! | 1..5 bytes  | 1..5 bytes    | 1..5 bytes    | bean body      |
//! +-------------+---------------+---------------+----------------+
//! ```
//!
//! Encoding writes the body first, after a 15-byte gap, and then fills
//! the header in backwards so it ends flush against the body. The frame
//! is the tail of the scratch buffer from the first header byte on, and
//! nothing is copied.

use bytes::Bytes;

use crate::varint::{MAX_INT32_LEN, MAX_UINT_LEN};
use crate::{Bean, CodecError, Cursor};

/// Widest possible header: type, serial and length at full width.
pub const MAX_HEADER_LEN: usize = MAX_UINT_LEN + MAX_INT32_LEN + MAX_UINT_LEN;

/// Narrowest possible header: one byte per field.
pub const MIN_HEADER_LEN: usize = 3;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    pub type_id: u32,
    /// 0 unsolicited, positive a request, negative the reply to `-serial`.
    pub serial: i32,
    /// Payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Reads a header from `input`.
    ///
    /// Returns `Ok(None)` and leaves the cursor where it was when the header
    /// is not fully buffered yet.
    pub fn read(input: &mut Cursor) -> Result<Option<Self>, CodecError> {
        if input.remaining() < MIN_HEADER_LEN {
            return Ok(None);
        }
        let start = input.position();
        match Self::read_fields(input) {
            Ok(header) => Ok(Some(header)),
            Err(CodecError::Eof) => {
                input.set_position(start);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read_fields(input: &mut Cursor) -> Result<Self, CodecError> {
        Ok(Self {
            type_id: input.unmarshal_uint()?,
            serial: input.unmarshal_i32()?,
            length: input.unmarshal_uint()?,
        })
    }

    /// Appends the header in forward order.
    pub fn write(&self, out: &mut Cursor) {
        out.marshal_uint(self.type_id)
            .marshal_i32(self.serial)
            .marshal_uint(self.length);
    }

    /// `true` if this is a reply to an earlier request.
    pub fn is_reply(&self) -> bool {
        self.serial < 0
    }
}

/// Decodes `bean` from the payload of the frame whose header was just
/// read, then moves the cursor to the end of the payload.
///
/// The bean cannot see past the payload; reading beyond it is
/// [`CodecError::FrameOverflow`]. Bytes it leaves unread are skipped.
///
/// The caller must have checked that the whole payload is buffered.
pub fn decode_body(input: &mut Cursor, header: &FrameHeader, bean: &mut dyn Bean) -> Result<(), CodecError> {
    let end = input.position() + header.length as usize;
    let result = input.with_limit(end, |c| bean.unmarshal(c));
    match result {
        Ok(()) => {
            input.set_position(end);
            Ok(())
        }
        Err(CodecError::Eof) => Err(CodecError::FrameOverflow {
            type_id: header.type_id,
            length: header.length,
        }),
        Err(e) => Err(e),
    }
}

/// A fully encoded frame, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl EncodedFrame {
    /// The frame bytes, header included.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Converts into shared bytes without copying.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf).slice(self.start..self.end)
    }
}

/// Encodes `bean` as one frame carrying `serial`.
///
/// # Errors
/// [`CodecError::Malformed`] if the bean type is above `i32::MAX`, and
/// [`CodecError::FrameTooLarge`] if the body exceeds `i32::MAX` bytes.
/// No peer can decode either.
pub fn encode_frame(bean: &dyn Bean, serial: i32) -> Result<EncodedFrame, CodecError> {
    let type_id = bean.bean_type();
    if type_id > i32::MAX as u32 {
        return Err(CodecError::Malformed(format!("bean type {type_id} exceeds i32::MAX")));
    }

    let mut out = Cursor::with_capacity(MAX_HEADER_LEN + bean.init_size());
    out.buffer_mut().resize(MAX_HEADER_LEN);
    bean.marshal(&mut out);

    let length = out.len() - MAX_HEADER_LEN;
    if length > i32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            type_id,
            length: u32::MAX,
            max: i32::MAX as usize,
        });
    }

    let mut start = MAX_HEADER_LEN;
    start -= out.marshal_uint_back(start, length as u32);
    start -= out.marshal_int_back(start, i64::from(serial));
    start -= out.marshal_uint_back(start, type_id);

    let (buf, end) = out.into_buffer().into_raw_parts();
    Ok(EncodedFrame { buf, start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DynBean, RawBean};

    #[test]
    fn test_encode_frame_header_is_shortest_form() {
        let bean = RawBean::new(1, vec![0x04, 0x05, 0x00]);
        let frame = encode_frame(&bean, 0).unwrap();
        assert_eq!(frame.as_slice(), [0x01, 0x00, 0x03, 0x04, 0x05, 0x00]);
    }

    #[test]
    fn test_encode_frame_matches_forward_header() {
        let bean = RawBean::new(300, vec![7; 200]);
        for serial in [0, 1, -1, 5000, -5000, i32::MAX, i32::MIN] {
            let frame = encode_frame(&bean, serial).unwrap();
            let mut expected = Cursor::new();
            FrameHeader {
                type_id: 300,
                serial,
                length: 200,
            }
            .write(&mut expected);
            expected.marshal_raw(&[7; 200]);
            assert_eq!(frame.as_slice(), expected.as_slice(), "serial {serial}");
        }
    }

    #[test]
    fn test_encode_frame_rejects_type_above_i32_max() {
        let bean = RawBean::new(i32::MAX as u32 + 1, vec![0x00]);
        assert!(matches!(encode_frame(&bean, 0), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_encode_frame_largest_type_reads_back() {
        let frame = encode_frame(&RawBean::new(i32::MAX as u32, vec![0x00]), 3).unwrap();
        let header = FrameHeader::read(&mut Cursor::from_slice(frame.as_slice())).unwrap().unwrap();
        assert_eq!(header.type_id, i32::MAX as u32);
        assert_eq!(header.serial, 3);
    }

    #[test]
    fn test_into_bytes_keeps_frame_range() {
        let frame = encode_frame(&DynBean::new(2), 9).unwrap();
        let expected = frame.as_slice().to_vec();
        assert_eq!(frame.into_bytes().as_ref(), expected.as_slice());
    }

    #[test]
    fn test_read_header_needs_minimum_bytes() {
        let mut c = Cursor::from_slice(&[0x01, 0x00]);
        assert_eq!(FrameHeader::read(&mut c).unwrap(), None);
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_read_header_partial_long_field_rewinds() {
        // type 1, serial needs 5 bytes but only 3 are here.
        let mut c = Cursor::from_slice(&[0x01, 0x78, 0x7F, 0xFF]);
        assert_eq!(FrameHeader::read(&mut c).unwrap(), None);
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_decode_body_skips_unread_tail() {
        let mut c = Cursor::from_slice(&[0x02, 0x00, 0x04, 0x04, 0x05, 0x00, 0xEE, 0x99]);
        let header = FrameHeader::read(&mut c).unwrap().unwrap();
        let mut bean = DynBean::new(2);
        decode_body(&mut c, &header, &mut bean).unwrap();
        // The terminator ended the bean at byte 3; 0xEE was skipped.
        assert_eq!(c.position(), 7);
        assert_eq!(c.unmarshal_u8().unwrap(), 0x99);
    }

    #[test]
    fn test_decode_body_overrun_is_overflow() {
        // Declared length 2, but the bean body needs 3 bytes.
        let mut c = Cursor::from_slice(&[0x02, 0x00, 0x02, 0x04, 0x05, 0x00]);
        let header = FrameHeader::read(&mut c).unwrap().unwrap();
        let err = decode_body(&mut c, &header, &mut DynBean::new(2)).unwrap_err();
        assert!(matches!(err, CodecError::FrameOverflow { type_id: 2, length: 2 }));
    }
}
