//! Transport layer for Beanwire.
//!
//! I/O runs on Tokio tasks, but those tasks never decode, dispatch, or
//! touch session state. Each one does its socket operation and then
//! pushes a single [`IoEvent`] into a [`CompletionQueue`]. The dispatcher
//! drains that queue on its own thread, in order, whenever it ticks.
//!
//! ```text
//!  tokio tasks                      tick thread
//!  accept / connect ──┐
//!  read loop ─────────┼── EventSink ──> CompletionQueue ──> Dispatcher::tick
//!  write_all ─────────┘
//! ```
//!
//! [`Transport`] starts connections and listeners; [`Link`] is the write
//! side of one open connection.
//!
//! # Feature Flags
//!
//! - `tcp` (default): [`TcpTransport`] over `tokio::net`.

mod error;
mod queue;
#[cfg(feature = "tcp")]
mod tcp;

pub use error::TransportError;
pub use queue::{CompletionQueue, EventSink};
#[cfg(feature = "tcp")]
pub use tcp::{TcpTransport, DEFAULT_RECV_CHUNK_SIZE};

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Opaque identifier for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new `SessionId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Accepted by one of our listeners.
    Accepted,
    /// Opened by our own `connect`.
    Connected,
}

/// One completed I/O operation.
#[derive(Debug)]
pub enum IoEvent {
    /// A listener is bound and accepting.
    Listening { addr: SocketAddr },
    /// A connection is open and its reader is running.
    Opened {
        session: SessionId,
        peer: SocketAddr,
        origin: Origin,
        link: Box<dyn Link>,
    },
    /// A connect, bind, or accept failed before any session existed.
    OpenFailed {
        addr: String,
        origin: Origin,
        error: TransportError,
    },
    /// Bytes arrived on a session.
    Received { session: SessionId, data: Vec<u8> },
    /// The last write issued on a session finished.
    Written { session: SessionId, bytes: usize },
    /// The read side failed or reached end of stream.
    ReadFailed {
        session: SessionId,
        error: TransportError,
    },
    /// The last write issued on a session failed.
    WriteFailed {
        session: SessionId,
        error: TransportError,
    },
}

impl IoEvent {
    /// The session this event belongs to, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::Opened { session, .. }
            | Self::Received { session, .. }
            | Self::Written { session, .. }
            | Self::ReadFailed { session, .. }
            | Self::WriteFailed { session, .. } => Some(*session),
            Self::Listening { .. } | Self::OpenFailed { .. } => None,
        }
    }
}

/// Write side of one open connection.
///
/// Both methods return immediately. The outcome of `write` arrives later
/// as [`IoEvent::Written`] or [`IoEvent::WriteFailed`]. Callers must not
/// issue a second write before the first one's event has been seen.
pub trait Link: Send + Sync + fmt::Debug + 'static {
    /// Starts writing all of `data`.
    fn write(&self, data: Bytes);

    /// Stops the reader and shuts the connection down. Events already in
    /// flight may still arrive.
    fn close(&self);
}

/// Starts connections and listeners.
///
/// Results are delivered through the given [`EventSink`], never returned.
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `host:port`.
    fn connect(&self, host: &str, port: u16, sink: EventSink);

    /// Binds `host:port` and accepts connections until shut down.
    fn listen(&self, host: &str, port: u16, backlog: u32, sink: EventSink);

    /// Stops the listener bound to `addr`, the address reported by
    /// [`IoEvent::Listening`]. Sessions it already accepted stay open.
    ///
    /// Returns `false` if no listener is bound there.
    fn stop_listening(&self, addr: SocketAddr) -> bool;

    /// Stops every listener started by this transport.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_new_and_into_inner() {
        let id = SessionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(7).to_string(), "session-7");
    }

    #[test]
    fn test_event_session_for_session_events_only() {
        let id = SessionId::new(3);
        let received = IoEvent::Received {
            session: id,
            data: vec![1],
        };
        assert_eq!(received.session(), Some(id));
        let listening = IoEvent::Listening {
            addr: "127.0.0.1:1".parse().unwrap(),
        };
        assert_eq!(listening.session(), None);
    }
}
