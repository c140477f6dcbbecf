//! Byte-level hooks around the wire, for compression or encryption.

use beanwire_transport::SessionId;

/// Transforms the byte stream of every session.
///
/// Returning `None` from either method leaves the bytes unchanged.
/// `encode` sees one complete frame at a time. `decode` sees whatever the
/// socket delivered, which may split or join frames, so a stateful
/// decoder has to keep its own per-session state.
pub trait StreamFilter: Send {
    /// Called with each encoded frame before it is written.
    fn encode(&mut self, session: SessionId, data: &[u8]) -> Option<Vec<u8>> {
        let _ = (session, data);
        None
    }

    /// Called with each chunk of received bytes before frames are parsed.
    fn decode(&mut self, session: SessionId, data: &[u8]) -> Option<Vec<u8>> {
        let _ = (session, data);
        None
    }
}
