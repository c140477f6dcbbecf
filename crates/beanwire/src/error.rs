//! Unified error type for Beanwire.

use beanwire_codec::CodecError;
use beanwire_session::SessionError;
use beanwire_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each wrapped variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum BeanwireError {
    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A transport could not be created or an I/O operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The target session is unknown or closed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A frame carried a type id with no registered bean.
    #[error("unknown bean type {0}")]
    UnknownType(u32),

    /// `reply` was given a serial that no request could have carried.
    #[error("serial {0} is not a request serial")]
    InvalidSerial(i32),
}

#[cfg(test)]
mod tests {
    use beanwire_transport::SessionId;

    use super::*;

    #[test]
    fn test_from_codec_error() {
        let err: BeanwireError = CodecError::Malformed("bad tag".into()).into();
        assert!(matches!(err, BeanwireError::Codec(_)));
        assert!(err.to_string().contains("bad tag"));
    }

    #[test]
    fn test_from_transport_error() {
        let err: BeanwireError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, BeanwireError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error() {
        let err: BeanwireError = SessionError::NotFound(SessionId::new(4)).into();
        assert!(matches!(err, BeanwireError::Session(_)));
        assert!(err.to_string().contains("session-4"));
    }

    #[test]
    fn test_unknown_type_display() {
        assert_eq!(BeanwireError::UnknownType(99).to_string(), "unknown bean type 99");
    }
}
