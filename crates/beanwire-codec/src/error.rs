/// Errors that can occur while encoding or decoding beans and frames.
///
/// Only [`CodecError::Eof`] is recoverable: it means "not enough bytes
/// yet" and the caller is expected to retry once more data arrives.
/// Everything else means the bytes on hand can never decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The cursor ran out of bytes in the middle of a value.
    #[error("unexpected end of data")]
    Eof,

    /// The bytes are structurally invalid (bad prefix, negative length, ...).
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A field id outside `1..=MAX_FIELD_ID` was passed to a tag writer.
    #[error("field id {0} out of range")]
    InvalidFieldId(u32),

    /// A bean tried to read past the end of its frame.
    #[error("bean type {type_id} reads past the end of its {length}-byte frame")]
    FrameOverflow { type_id: u32, length: u32 },

    /// A frame declared a payload larger than its type allows.
    #[error("frame of type {type_id} declares {length} bytes, limit is {max}")]
    FrameTooLarge { type_id: u32, length: u32, max: usize },

    /// Rendering a dynamic bean to JSON failed.
    #[cfg(feature = "json")]
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Returns `true` for the recoverable "need more bytes" condition.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_eof_only_for_eof() {
        assert!(CodecError::Eof.is_eof());
        assert!(!CodecError::Malformed("x".into()).is_eof());
        assert!(!CodecError::InvalidFieldId(0).is_eof());
    }

    #[test]
    fn test_frame_overflow_display_names_type_and_length() {
        let err = CodecError::FrameOverflow {
            type_id: 7,
            length: 4,
        };
        let text = err.to_string();
        assert!(text.contains("type 7"));
        assert!(text.contains("4-byte"));
    }
}
