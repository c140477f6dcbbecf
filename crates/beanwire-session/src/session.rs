//! One open connection and the table of all of them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;

use beanwire_codec::Cursor;
use beanwire_transport::{Link, Origin, SessionId};
use bytes::Bytes;

use crate::SessionError;

// ---------------------------------------------------------------------------
// CloseReason
// ---------------------------------------------------------------------------

/// Why a session was closed.
///
/// The numeric [`code`](Self::code) is stable and may be logged or sent to
/// other systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Closed deliberately by the local application.
    Active,
    /// The read side failed or the peer closed the stream.
    Read,
    /// A write failed.
    Write,
    /// A received frame was malformed.
    Decode,
    /// A received frame was well-formed but not acceptable, such as an
    /// unregistered type under the strict policy.
    Protocol,
}

impl CloseReason {
    pub fn code(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Decode => 3,
            Self::Protocol => 4,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Read => "read",
            Self::Write => "write",
            Self::Decode => "decode",
            Self::Protocol => "protocol",
        };
        write!(f, "{name}({})", self.code())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One open connection.
///
/// Writes go through a queue: at most one is handed to the [`Link`] at a
/// time, and the next one only after the transport has reported the
/// previous one finished ([`write_completed`](Self::write_completed)).
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    origin: Origin,
    link: Box<dyn Link>,
    /// Received bytes not yet decoded into frames.
    recv: Cursor,
    write_queue: VecDeque<Bytes>,
    writing: bool,
    closed: bool,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr, origin: Origin, link: Box<dyn Link>) -> Self {
        Self {
            id,
            peer,
            origin,
            link,
            recv: Cursor::new(),
            write_queue: VecDeque::new(),
            writing: false,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The receive accumulation buffer.
    pub fn recv_buffer(&mut self) -> &mut Cursor {
        &mut self.recv
    }

    /// Queues `data` for writing, and writes it right away if nothing is
    /// in flight. Returns `true` if the write was issued now.
    ///
    /// # Errors
    /// [`SessionError::Closed`] after [`close`](Self::close).
    pub fn enqueue_write(&mut self, data: Bytes) -> Result<bool, SessionError> {
        if self.closed {
            return Err(SessionError::Closed(self.id));
        }
        self.write_queue.push_back(data);
        Ok(self.issue_next())
    }

    /// Records that the in-flight write finished and issues the next
    /// queued one, if any. Returns `true` if another write was issued.
    pub fn write_completed(&mut self) -> bool {
        self.writing = false;
        if self.closed {
            return false;
        }
        self.issue_next()
    }

    fn issue_next(&mut self) -> bool {
        if self.writing {
            return false;
        }
        match self.write_queue.pop_front() {
            Some(data) => {
                tracing::trace!(session = %self.id, bytes = data.len(), "write issued");
                self.writing = true;
                self.link.write(data);
                true
            }
            None => false,
        }
    }

    /// `true` while a write is in flight.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// Writes waiting behind the in-flight one.
    pub fn queued_writes(&self) -> usize {
        self.write_queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drops queued writes and closes the connection. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.write_queue.clear();
        self.recv.clear();
        self.link.close();
    }
}

// ---------------------------------------------------------------------------
// SessionTable
// ---------------------------------------------------------------------------

/// Every open session, keyed by id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. A session already stored under the same id is
    /// replaced and returned.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.id(), session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Like [`get_mut`](Self::get_mut), but a missing session is an error.
    pub fn require(&mut self, id: SessionId) -> Result<&mut Session, SessionError> {
        self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Ids of every open session, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Link that records what it was asked to do.
    #[derive(Debug, Default, Clone)]
    struct RecordingLink {
        writes: Arc<Mutex<Vec<Bytes>>>,
        closes: Arc<Mutex<u32>>,
    }

    impl Link for RecordingLink {
        fn write(&self, data: Bytes) {
            self.writes.lock().unwrap().push(data);
        }

        fn close(&self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    fn session(link: &RecordingLink) -> Session {
        Session::new(
            SessionId::new(1),
            "127.0.0.1:9000".parse().unwrap(),
            Origin::Accepted,
            Box::new(link.clone()),
        )
    }

    // =====================================================================
    // CloseReason
    // =====================================================================

    #[test]
    fn test_close_reason_codes_are_stable() {
        let codes: Vec<u8> = [
            CloseReason::Active,
            CloseReason::Read,
            CloseReason::Write,
            CloseReason::Decode,
            CloseReason::Protocol,
        ]
        .into_iter()
        .map(CloseReason::code)
        .collect();
        assert_eq!(codes, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_close_reason_display_includes_code() {
        assert_eq!(CloseReason::Decode.to_string(), "decode(3)");
    }

    // =====================================================================
    // Write queue
    // =====================================================================

    #[test]
    fn test_enqueue_write_idle_session_issues_immediately() {
        let link = RecordingLink::default();
        let mut s = session(&link);

        assert!(s.enqueue_write(Bytes::from_static(b"a")).unwrap());

        assert!(s.is_writing());
        assert_eq!(link.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_enqueue_write_while_in_flight_waits_for_completion() {
        let link = RecordingLink::default();
        let mut s = session(&link);
        s.enqueue_write(Bytes::from_static(b"a")).unwrap();

        assert!(!s.enqueue_write(Bytes::from_static(b"b")).unwrap());
        assert!(!s.enqueue_write(Bytes::from_static(b"c")).unwrap());
        assert_eq!(link.writes.lock().unwrap().len(), 1);
        assert_eq!(s.queued_writes(), 2);

        assert!(s.write_completed());
        assert!(s.write_completed());
        assert!(!s.write_completed());
        assert!(!s.is_writing());

        let writes = link.writes.lock().unwrap();
        let order: Vec<&[u8]> = writes.iter().map(|b| b.as_ref()).collect();
        assert_eq!(order, [b"a", b"b", b"c"]);
    }

    #[test]
    fn test_enqueue_write_after_close_returns_closed() {
        let link = RecordingLink::default();
        let mut s = session(&link);
        s.close();

        let result = s.enqueue_write(Bytes::from_static(b"a"));

        assert!(matches!(result, Err(SessionError::Closed(id)) if id == SessionId::new(1)));
    }

    #[test]
    fn test_close_drops_queue_and_closes_link_once() {
        let link = RecordingLink::default();
        let mut s = session(&link);
        s.enqueue_write(Bytes::from_static(b"a")).unwrap();
        s.enqueue_write(Bytes::from_static(b"b")).unwrap();

        s.close();
        s.close();

        assert_eq!(s.queued_writes(), 0);
        assert_eq!(*link.closes.lock().unwrap(), 1);
        assert!(!s.write_completed());
    }

    // =====================================================================
    // SessionTable
    // =====================================================================

    #[test]
    fn test_require_unknown_session_returns_not_found() {
        let mut table = SessionTable::new();

        let result = table.require(SessionId::new(5));

        assert!(matches!(result, Err(SessionError::NotFound(id)) if id == SessionId::new(5)));
    }

    #[test]
    fn test_insert_and_remove_track_len() {
        let link = RecordingLink::default();
        let mut table = SessionTable::new();
        assert!(table.insert(session(&link)).is_none());
        assert_eq!(table.len(), 1);
        assert!(table.contains(SessionId::new(1)));

        assert!(table.remove(SessionId::new(1)).is_some());
        assert!(table.is_empty());
    }
}
