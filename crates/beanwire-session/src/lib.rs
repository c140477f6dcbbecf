//! Session state for Beanwire.
//!
//! Everything in this crate belongs to the tick thread: nothing is shared
//! with I/O tasks, so there is no locking.
//!
//! - [`Session`]: one open connection, with its receive buffer and its
//!   strictly sequential write queue.
//! - [`SessionTable`]: every open session, by id.
//! - [`PendingRequests`]: asks awaiting a reply, by serial, in FIFO order
//!   for the timeout sweep.
//! - [`CloseReason`]: why a session ended, with stable numeric codes.
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)   <- decodes frames, routes replies, calls handlers
//!     |
//! Session layer (this crate)
//!     |
//! Transport (below)    <- SessionId, Link, IoEvent
//! ```

mod error;
mod pending;
mod session;

pub use error::SessionError;
pub use pending::PendingRequests;
pub use session::{CloseReason, Session, SessionTable};
