//! Session lifecycle hooks.

use std::net::SocketAddr;

use beanwire_codec::FrameHeader;
use beanwire_session::CloseReason;
use beanwire_transport::{Origin, SessionId, TransportError};

use crate::Dispatcher;

/// Notified of connection lifecycle events.
///
/// Every method has an empty default, so implement only what you need.
/// All of them run on the tick thread and may call back into the
/// dispatcher, for example to send a greeting from `on_open`.
///
/// # Example
///
/// ```rust
/// use beanwire::prelude::*;
///
/// struct Greeter;
///
/// impl SessionListener for Greeter {
///     fn on_open(&self, d: &mut Dispatcher, session: SessionId, _peer: std::net::SocketAddr, _origin: Origin) {
///         let _ = d.send_raw(session, 1, vec![0]);
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait SessionListener: Send + Sync + 'static {
    /// A listener finished binding.
    fn on_listening(&self, dispatcher: &mut Dispatcher, addr: SocketAddr) {}

    /// A session opened, by accept or by connect.
    fn on_open(&self, dispatcher: &mut Dispatcher, session: SessionId, peer: SocketAddr, origin: Origin) {}

    /// A session closed. Its pending asks have already been answered with
    /// `None`.
    fn on_close(&self, dispatcher: &mut Dispatcher, session: SessionId, reason: CloseReason) {}

    /// A connect, bind, or accept failed. No session was created.
    fn on_open_failed(&self, dispatcher: &mut Dispatcher, addr: &str, origin: Origin, error: &TransportError) {}

    /// The transport finished writing one frame of `session`.
    fn on_sent(&self, dispatcher: &mut Dispatcher, session: SessionId) {}

    /// A frame of an unregistered type arrived under the tolerant policy.
    /// `raw` is its payload.
    fn on_unknown_frame(&self, dispatcher: &mut Dispatcher, session: SessionId, header: &FrameHeader, raw: &[u8]) {}
}
