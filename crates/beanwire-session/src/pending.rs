//! Requests awaiting a reply.
//!
//! Two structures are kept in step:
//!
//! - a map from serial to the pending entry, for reply lookup;
//! - a FIFO of `(serial, ticket, created_at)`, oldest first, for the
//!   timeout sweep.
//!
//! A reply removes the map entry only. Its FIFO record goes stale and is
//! discarded when it reaches the head. The ticket tells a stale record
//! apart from a newer request that reused the same serial.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use beanwire_transport::SessionId;
use tokio::time::Instant;

#[derive(Debug)]
struct Pending<F> {
    session: SessionId,
    ticket: u64,
    callback: F,
}

/// Outstanding asks, generic over the callback type.
#[derive(Debug)]
pub struct PendingRequests<F> {
    entries: HashMap<i32, Pending<F>>,
    order: VecDeque<(i32, u64, Instant)>,
    last_serial: i32,
    next_ticket: u64,
}

impl<F> PendingRequests<F> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            last_serial: 0,
            next_ticket: 0,
        }
    }

    /// Picks the next serial: counts up through the positive `i32`s,
    /// wraps from `i32::MAX` back to 1, and skips serials still pending.
    pub fn allocate(&mut self) -> i32 {
        loop {
            self.last_serial = if self.last_serial >= i32::MAX {
                1
            } else {
                self.last_serial + 1
            };
            if !self.entries.contains_key(&self.last_serial) {
                return self.last_serial;
            }
        }
    }

    /// Records a request sent on `session` with `serial`.
    pub fn insert(&mut self, serial: i32, session: SessionId, callback: F, now: Instant) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.entries.insert(
            serial,
            Pending {
                session,
                ticket,
                callback,
            },
        );
        self.order.push_back((serial, ticket, now));
    }

    /// Removes and returns the callback for `serial` if it is pending
    /// for `session`. A reply arriving on another session leaves the entry
    /// in place.
    pub fn take(&mut self, serial: i32, session: SessionId) -> Option<F> {
        match self.entries.get(&serial) {
            Some(p) if p.session == session => self.entries.remove(&serial).map(|p| p.callback),
            _ => None,
        }
    }

    /// Removes every request created `timeout` or more before `now`,
    /// oldest first. Stops at the first one still within its time.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<F> {
        let mut expired = Vec::new();
        while let Some(&(serial, ticket, created)) = self.order.front() {
            if !self.is_live(serial, ticket) {
                self.order.pop_front();
                continue;
            }
            if now.saturating_duration_since(created) < timeout {
                break;
            }
            self.order.pop_front();
            if let Some(p) = self.entries.remove(&serial) {
                tracing::debug!(serial, session = %p.session, "ask timed out");
                expired.push(p.callback);
            }
        }
        expired
    }

    /// Removes every request of `session`, oldest first.
    pub fn drain_session(&mut self, session: SessionId) -> Vec<F> {
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(self.order.len());
        for (serial, ticket, created) in self.order.drain(..) {
            match self.entries.get(&serial) {
                Some(p) if p.ticket == ticket && p.session == session => {
                    if let Some(p) = self.entries.remove(&serial) {
                        drained.push(p.callback);
                    }
                }
                Some(p) if p.ticket == ticket => kept.push_back((serial, ticket, created)),
                _ => {}
            }
        }
        self.order = kept;
        drained
    }

    fn is_live(&self, serial: i32, ticket: u64) -> bool {
        self.entries.get(&serial).is_some_and(|p| p.ticket == ticket)
    }

    pub fn contains(&self, serial: i32) -> bool {
        self.entries.contains_key(&serial)
    }

    /// Requests still awaiting a reply.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F> Default for PendingRequests<F> {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Time is passed in explicitly, so these tests build instants by
    //! adding offsets to one base instead of sleeping.

    use super::*;

    const A: SessionId = SessionId::new(1);
    const B: SessionId = SessionId::new(2);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_allocate_starts_at_one_and_counts_up() {
        let mut p: PendingRequests<()> = PendingRequests::new();
        assert_eq!(p.allocate(), 1);
        assert_eq!(p.allocate(), 2);
    }

    #[test]
    fn test_allocate_wraps_and_skips_pending_serials() {
        let t0 = Instant::now();
        let mut p: PendingRequests<()> = PendingRequests::new();
        p.insert(1, A, (), t0);
        p.last_serial = i32::MAX - 1;

        assert_eq!(p.allocate(), i32::MAX);
        // 1 is still pending, so the counter lands on 2.
        assert_eq!(p.allocate(), 2);
    }

    #[test]
    fn test_take_matching_session_returns_callback_once() {
        let mut p = PendingRequests::new();
        p.insert(7, A, "cb", Instant::now());

        assert_eq!(p.take(7, A), Some("cb"));
        assert_eq!(p.take(7, A), None);
        assert!(p.is_empty());
    }

    #[test]
    fn test_take_other_session_leaves_entry() {
        let mut p = PendingRequests::new();
        p.insert(7, A, "cb", Instant::now());

        assert_eq!(p.take(7, B), None);
        assert!(p.contains(7));
    }

    #[test]
    fn test_expire_pops_only_old_heads_in_order() {
        let t0 = Instant::now();
        let mut p = PendingRequests::new();
        p.insert(1, A, "first", t0);
        p.insert(2, B, "second", t0 + secs(1));
        p.insert(3, A, "third", t0 + secs(5));

        let expired = p.expire(t0 + secs(11), secs(10));

        assert_eq!(expired, ["first", "second"]);
        assert_eq!(p.len(), 1);
        assert!(p.contains(3));
    }

    #[test]
    fn test_expire_skips_replied_entries() {
        let t0 = Instant::now();
        let mut p = PendingRequests::new();
        p.insert(1, A, "replied", t0);
        p.insert(2, A, "waiting", t0);
        p.take(1, A);

        assert_eq!(p.expire(t0 + secs(10), secs(10)), ["waiting"]);
    }

    #[test]
    fn test_expire_reused_serial_keeps_new_request() {
        // Serial 1 is answered and then reused by a later request; the
        // stale FIFO record must not expire the new one early.
        let t0 = Instant::now();
        let mut p = PendingRequests::new();
        p.insert(1, A, "old", t0);
        p.take(1, A);
        p.insert(1, A, "new", t0 + secs(8));

        assert!(p.expire(t0 + secs(10), secs(10)).is_empty());
        assert_eq!(p.expire(t0 + secs(18), secs(10)), ["new"]);
    }

    #[test]
    fn test_drain_session_returns_only_that_session_in_order() {
        let t0 = Instant::now();
        let mut p = PendingRequests::new();
        p.insert(1, A, "a1", t0);
        p.insert(2, B, "b1", t0);
        p.insert(3, A, "a2", t0);

        assert_eq!(p.drain_session(A), ["a1", "a2"]);
        assert_eq!(p.len(), 1);
        assert_eq!(p.expire(t0 + secs(10), secs(10)), ["b1"]);
    }
}
