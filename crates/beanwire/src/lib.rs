//! # Beanwire
//!
//! Framed binary messaging over TCP. Messages ("beans") are sparse,
//! tagged field sets that survive schema changes in either direction.
//! Requests carry a serial, and the reply carries it back negated.
//!
//! ```text
//! Dispatcher (this crate)   <- registries, handlers, ask/reply, tick loop
//!     |
//! beanwire-session          <- per-connection state, pending asks
//!     |
//! beanwire-transport        <- tokio TCP tasks, completion queue
//!     |
//! beanwire-codec            <- varints, fields, beans, frames
//! ```
//!
//! All protocol work happens inside [`Dispatcher::tick`], on whichever
//! thread calls it. I/O tasks only report completions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beanwire::prelude::*;
//!
//! // Define beans by implementing `Bean` and `BeanType`, then:
//! // let mut dispatcher = Dispatcher::builder()
//! //     .on::<Ping, _>(|d, ping| { d.reply(ping.session, ping.serial, &Pong).ok(); })
//! //     .build()?;
//! // dispatcher.listen("0.0.0.0", 9000);
//! // loop { dispatcher.tick(); /* sleep or await an interval */ }
//! ```
//!
//! # Feature Flags
//!
//! - `json` (default): `DynBean::to_json`.

mod config;
mod dispatcher;
mod error;
mod filter;
mod listener;
mod registry;

pub use beanwire_codec as codec;
pub use beanwire_session::CloseReason;
pub use beanwire_transport as transport;
pub use config::{DispatcherConfig, UnknownTypePolicy};
pub use dispatcher::{AskCallback, Dispatcher, DispatcherBuilder};
pub use error::BeanwireError;
pub use filter::StreamFilter;
pub use listener::SessionListener;
pub use registry::{BeanFactory, BeanRegistry, Handler, HandlerRegistry, Incoming};

/// Everything needed to define beans and run a dispatcher.
pub mod prelude {
    pub use beanwire_codec::{Bean, BeanType, CodecError, Cursor, DynBean, FrameHeader, RawBean, Value, WireType};
    pub use beanwire_transport::{Origin, SessionId, TransportError};

    pub use crate::{
        BeanwireError, CloseReason, Dispatcher, DispatcherBuilder, DispatcherConfig, Incoming, SessionListener,
        StreamFilter, UnknownTypePolicy,
    };
}
