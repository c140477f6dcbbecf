//! The dispatcher: owns every session and runs all protocol logic on the
//! thread that calls [`Dispatcher::tick`].
//!
//! ```text
//!   IoEvent ──> tick() ──┬─ Opened      -> Session table, on_open
//!                        ├─ Received    -> filter -> frames -> replies / handlers
//!                        ├─ Written     -> next queued write, on_sent
//!                        └─ *Failed     -> close(reason), flush asks
//!               then the ask timeout sweep
//! ```
//!
//! Frames received in one chunk are decoded first and dispatched after,
//! in wire order. A handler that closes its own session stops delivery of
//! the rest of that chunk.

use std::net::SocketAddr;
use std::sync::Arc;

use beanwire_codec::{Bean, BeanType, CodecError, Cursor, FrameHeader, RawBean, decode_body, encode_frame};
use beanwire_session::{CloseReason, PendingRequests, Session, SessionTable};
use beanwire_transport::{CompletionQueue, EventSink, IoEvent, Origin, SessionId, TcpTransport, Transport};
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::{
    BeanRegistry, BeanwireError, DispatcherConfig, HandlerRegistry, Incoming, SessionListener, StreamFilter,
    UnknownTypePolicy,
};

/// Called once with the reply to an ask, or with `None` when the ask
/// timed out or its session closed first.
pub type AskCallback = Box<dyn FnOnce(&mut Dispatcher, Option<Box<dyn Bean>>) + Send>;

/// One frame pulled out of a session's receive buffer.
enum Decoded {
    Bean { header: FrameHeader, bean: Box<dyn Bean> },
    Unknown { header: FrameHeader, raw: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`Dispatcher`].
///
/// # Example
///
/// ```rust,no_run
/// use beanwire::prelude::*;
///
/// # #[derive(Debug, Default)] struct Ping;
/// # impl Bean for Ping {
/// #     fn bean_type(&self) -> u32 { 1 }
/// #     fn marshal(&self, out: &mut Cursor) { out.marshal_u8(0); }
/// #     fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> { input.skip_bean() }
/// # }
/// # impl BeanType for Ping { const TYPE: u32 = 1; }
/// # async fn run() -> Result<(), BeanwireError> {
/// let mut dispatcher = Dispatcher::builder()
///     .on::<Ping, _>(|d, ping| {
///         let _ = d.reply(ping.session, ping.serial, &Ping);
///     })
///     .build()?;
/// dispatcher.listen("127.0.0.1", 9000);
/// loop {
///     dispatcher.tick();
///     tokio::time::sleep(std::time::Duration::from_millis(5)).await;
/// }
/// # }
/// ```
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    transport: Option<Box<dyn Transport>>,
    beans: BeanRegistry,
    handlers: HandlerRegistry,
    listener: Option<Arc<dyn SessionListener>>,
    filter: Option<Box<dyn StreamFilter>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            transport: None,
            beans: BeanRegistry::new(),
            handlers: HandlerRegistry::new(),
            listener: None,
            filter: None,
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `transport` instead of a [`TcpTransport`] on the current
    /// Tokio runtime.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Makes `T` decodable, for types that arrive only as replies.
    pub fn bean<T: BeanType>(mut self) -> Self {
        self.beans.register::<T>();
        self
    }

    /// Makes `type_id` decodable with a custom factory.
    pub fn bean_with<F>(mut self, type_id: u32, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Bean> + Send + Sync + 'static,
    {
        self.beans.register_with(type_id, factory);
        self
    }

    /// Sets the handler for `type_id`. The type must also be made
    /// decodable with [`bean_with`](Self::bean_with).
    pub fn handler<F>(mut self, type_id: u32, handler: F) -> Self
    where
        F: Fn(&mut Dispatcher, Incoming) + Send + Sync + 'static,
    {
        self.handlers.insert(type_id, handler);
        self
    }

    /// Registers `T` and a handler that receives it by value type.
    pub fn on<T, F>(mut self, handler: F) -> Self
    where
        T: BeanType,
        F: Fn(&mut Dispatcher, Incoming<T>) + Send + Sync + 'static,
    {
        self.beans.register::<T>();
        self.handlers.on::<T, F>(handler);
        self
    }

    pub fn listener(mut self, listener: impl SessionListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn filter(mut self, filter: impl StreamFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Builds the dispatcher.
    ///
    /// # Errors
    /// Without an explicit transport, fails with
    /// [`TransportError::NoRuntime`](beanwire_transport::TransportError::NoRuntime)
    /// when called outside a Tokio runtime.
    pub fn build(self) -> Result<Dispatcher, BeanwireError> {
        let config = self.config.validated();
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(TcpTransport::current()?.with_recv_chunk_size(config.recv_chunk_size)),
        };
        debug!(
            beans = self.beans.len(),
            handlers = self.handlers.len(),
            policy = ?config.unknown_type_policy,
            "dispatcher built"
        );
        Ok(Dispatcher {
            config,
            transport,
            queue: CompletionQueue::new(),
            sessions: SessionTable::new(),
            pending: PendingRequests::new(),
            beans: self.beans,
            handlers: self.handlers,
            listener: self.listener,
            filter: self.filter,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns every session, the pending asks, and the registries.
///
/// Nothing here is shared with I/O tasks. They only push [`IoEvent`]s,
/// which [`tick`](Self::tick) drains and acts on.
pub struct Dispatcher {
    config: DispatcherConfig,
    transport: Box<dyn Transport>,
    queue: CompletionQueue,
    sessions: SessionTable,
    pending: PendingRequests<AskCallback>,
    beans: BeanRegistry,
    handlers: HandlerRegistry,
    listener: Option<Arc<dyn SessionListener>>,
    filter: Option<Box<dyn StreamFilter>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// A producer handle for this dispatcher's completion queue, for
    /// custom transports.
    pub fn event_sink(&self) -> EventSink {
        self.queue.sink()
    }

    // -- Outer surface ----------------------------------------------------

    /// Starts connecting to `host:port`. The session appears through
    /// `SessionListener::on_open` on a later tick.
    pub fn connect(&self, host: &str, port: u16) {
        debug!(host, port, "connecting");
        self.transport.connect(host, port, self.queue.sink());
    }

    /// Starts listening on `host:port` with the configured backlog.
    pub fn listen(&self, host: &str, port: u16) {
        self.listen_with_backlog(host, port, self.config.listen_backlog);
    }

    pub fn listen_with_backlog(&self, host: &str, port: u16, backlog: u32) {
        debug!(host, port, backlog, "listening");
        self.transport.listen(host, port, backlog, self.queue.sink());
    }

    /// Stops the listener bound to `addr`, as reported to
    /// `SessionListener::on_listening`. Sessions it accepted stay open.
    ///
    /// Returns `false` if nothing is listening there.
    pub fn stop_listening(&self, addr: SocketAddr) -> bool {
        let stopped = self.transport.stop_listening(addr);
        debug!(%addr, stopped, "stop listening");
        stopped
    }

    /// Sends `bean` as an unsolicited frame (serial 0).
    pub fn send(&mut self, session: SessionId, bean: &dyn Bean) -> Result<(), BeanwireError> {
        self.send_frame(session, bean, 0)
    }

    /// Sends `bean` unsolicited to every open session, or only to the
    /// sessions opened from `origin`. The frame is encoded once.
    ///
    /// Returns the number of sessions it was queued on.
    pub fn broadcast(&mut self, bean: &dyn Bean, origin: Option<Origin>) -> Result<usize, BeanwireError> {
        let frame = encode_frame(bean, 0)?.into_bytes();
        let targets: Vec<SessionId> = self
            .sessions
            .ids()
            .into_iter()
            .filter(|&id| origin.is_none() || self.origin(id) == origin)
            .collect();
        for &session in &targets {
            self.queue_frame(session, frame.clone())?;
        }
        trace!(type_id = bean.bean_type(), ?origin, sessions = targets.len(), bytes = frame.len(), "frame broadcast");
        Ok(targets.len())
    }

    /// Sends an already-encoded bean body under `type_id`.
    pub fn send_raw(&mut self, session: SessionId, type_id: u32, payload: Vec<u8>) -> Result<(), BeanwireError> {
        self.send_frame(session, &RawBean::new(type_id, payload), 0)
    }

    /// Sends `bean` as a request. `on_answer` runs exactly once: with the
    /// reply bean, or with `None` on timeout or session close.
    ///
    /// Returns the request serial.
    pub fn ask<F>(&mut self, session: SessionId, bean: &dyn Bean, on_answer: F) -> Result<i32, BeanwireError>
    where
        F: FnOnce(&mut Dispatcher, Option<Box<dyn Bean>>) + Send + 'static,
    {
        let serial = self.pending.allocate();
        self.send_frame(session, bean, serial)?;
        self.pending.insert(serial, session, Box::new(on_answer), Instant::now());
        trace!(%session, serial, type_id = bean.bean_type(), "ask sent");
        Ok(serial)
    }

    /// Answers the request that arrived with `serial`.
    pub fn reply(&mut self, session: SessionId, serial: i32, bean: &dyn Bean) -> Result<(), BeanwireError> {
        if serial <= 0 {
            return Err(BeanwireError::InvalidSerial(serial));
        }
        self.send_frame(session, bean, -serial)
    }

    /// Closes `session`, answers its pending asks with `None`, and notifies
    /// the listener. Returns `false` if the session was not open.
    pub fn close(&mut self, session: SessionId, reason: CloseReason) -> bool {
        let Some(mut closed) = self.sessions.remove(session) else {
            return false;
        };
        closed.close();
        info!(%session, peer = %closed.peer(), %reason, "session closed");

        for callback in self.pending.drain_session(session) {
            callback(self, None);
        }
        if let Some(listener) = self.listener.clone() {
            listener.on_close(self, session, reason);
        }
        true
    }

    /// Stops all listeners and closes every session with
    /// [`CloseReason::Active`].
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
        for session in self.sessions.ids() {
            self.close(session, CloseReason::Active);
        }
    }

    /// Processes every queued I/O completion in order, then times out
    /// expired asks. Returns the number of completions processed.
    pub fn tick(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.queue.try_next() {
            self.handle_event(event);
            processed += 1;
        }
        self.sweep_timeouts();
        processed
    }

    // -- Queries ----------------------------------------------------------

    pub fn is_open(&self, session: SessionId) -> bool {
        self.sessions.contains(session)
    }

    pub fn peer(&self, session: SessionId) -> Option<SocketAddr> {
        self.sessions.get(session).map(Session::peer)
    }

    pub fn origin(&self, session: SessionId) -> Option<Origin> {
        self.sessions.get(session).map(Session::origin)
    }

    /// Ids of all open sessions, in no particular order.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.ids()
    }

    /// Asks still waiting for a reply.
    pub fn pending_asks(&self) -> usize {
        self.pending.len()
    }

    // -- Send path --------------------------------------------------------

    fn send_frame(&mut self, session: SessionId, bean: &dyn Bean, serial: i32) -> Result<(), BeanwireError> {
        self.sessions.require(session)?;
        let frame = encode_frame(bean, serial)?;
        trace!(%session, serial, type_id = bean.bean_type(), bytes = frame.len(), "frame queued");
        self.queue_frame(session, frame.into_bytes())
    }

    /// Runs the encode filter over one encoded frame and queues the result.
    fn queue_frame(&mut self, session: SessionId, frame: Bytes) -> Result<(), BeanwireError> {
        let data = match self.filter.as_mut().and_then(|f| f.encode(session, &frame)) {
            Some(filtered) => Bytes::from(filtered),
            None => frame,
        };
        self.sessions.require(session)?.enqueue_write(data)?;
        Ok(())
    }

    // -- Event handling ---------------------------------------------------

    fn handle_event(&mut self, event: IoEvent) {
        match event {
            IoEvent::Listening { addr } => {
                info!(%addr, "listening");
                if let Some(listener) = self.listener.clone() {
                    listener.on_listening(self, addr);
                }
            }
            IoEvent::Opened {
                session,
                peer,
                origin,
                link,
            } => {
                info!(%session, %peer, ?origin, "session opened");
                self.sessions.insert(Session::new(session, peer, origin, link));
                if let Some(listener) = self.listener.clone() {
                    listener.on_open(self, session, peer, origin);
                }
            }
            IoEvent::OpenFailed { addr, origin, error } => {
                warn!(%addr, ?origin, %error, "open failed");
                if let Some(listener) = self.listener.clone() {
                    listener.on_open_failed(self, &addr, origin, &error);
                }
            }
            IoEvent::Received { session, data } => self.on_received(session, data),
            IoEvent::Written { session, bytes } => {
                let Some(s) = self.sessions.get_mut(session) else {
                    return;
                };
                trace!(%session, bytes, "write completed");
                s.write_completed();
                if let Some(listener) = self.listener.clone() {
                    listener.on_sent(self, session);
                }
            }
            IoEvent::ReadFailed { session, error } => {
                if self.sessions.contains(session) {
                    debug!(%session, %error, "read failed");
                    self.close(session, CloseReason::Read);
                }
            }
            IoEvent::WriteFailed { session, error } => {
                if self.sessions.contains(session) {
                    debug!(%session, %error, "write failed");
                    self.close(session, CloseReason::Write);
                }
            }
        }
    }

    // -- Receive path -----------------------------------------------------

    fn on_received(&mut self, session: SessionId, data: Vec<u8>) {
        if !self.sessions.contains(session) {
            trace!(%session, bytes = data.len(), "data for closed session dropped");
            return;
        }
        let data = match self.filter.as_mut().and_then(|f| f.decode(session, &data)) {
            Some(filtered) => filtered,
            None => data,
        };
        let Some(s) = self.sessions.get_mut(session) else {
            return;
        };
        let recv = s.recv_buffer();
        recv.marshal_raw(&data);
        let (frames, failure) = extract_frames(recv, &self.beans, &self.config);

        for frame in frames {
            if !self.sessions.contains(session) {
                break;
            }
            self.dispatch(session, frame);
        }

        if let Some(error) = failure {
            let reason = match error {
                BeanwireError::UnknownType(_) => CloseReason::Protocol,
                _ => CloseReason::Decode,
            };
            warn!(%session, %error, %reason, "bad frame, closing session");
            self.close(session, reason);
        }
    }

    fn dispatch(&mut self, session: SessionId, frame: Decoded) {
        match frame {
            Decoded::Unknown { header, raw } => {
                debug!(%session, type_id = header.type_id, bytes = raw.len(), "unknown frame skipped");
                if let Some(listener) = self.listener.clone() {
                    listener.on_unknown_frame(self, session, &header, &raw);
                }
            }
            Decoded::Bean { header, bean } => {
                if header.is_reply() {
                    let answer = header
                        .serial
                        .checked_neg()
                        .and_then(|serial| self.pending.take(serial, session));
                    if let Some(callback) = answer {
                        trace!(%session, serial = header.serial, "reply matched");
                        callback(self, Some(bean));
                        return;
                    }
                }
                match self.handlers.get(header.type_id) {
                    Some(handler) => handler(
                        self,
                        Incoming {
                            session,
                            serial: header.serial,
                            bean,
                        },
                    ),
                    None => debug!(%session, type_id = header.type_id, serial = header.serial, "no handler for bean"),
                }
            }
        }
    }

    fn sweep_timeouts(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let timeout = self.config.ask_timeout();
        for callback in self.pending.expire(Instant::now(), timeout) {
            callback(self, None);
        }
    }
}

/// Decodes every complete frame in `recv`, then drops the consumed bytes.
///
/// Stops early at an incomplete frame, which stays buffered for the next
/// chunk, or at a bad one, which is returned alongside the frames before it.
fn extract_frames(
    recv: &mut Cursor,
    beans: &BeanRegistry,
    config: &DispatcherConfig,
) -> (Vec<Decoded>, Option<BeanwireError>) {
    let mut frames = Vec::new();
    let failure = loop {
        let start = recv.position();
        let header = match FrameHeader::read(recv) {
            Ok(Some(header)) => header,
            Ok(None) => break None,
            Err(e) => break Some(e.into()),
        };

        let length = header.length as usize;
        let max = beans.max_size(header.type_id, config.max_frame_size);
        if length > max {
            break Some(
                CodecError::FrameTooLarge {
                    type_id: header.type_id,
                    length: header.length,
                    max,
                }
                .into(),
            );
        }
        if length > recv.remaining() {
            recv.set_position(start);
            break None;
        }

        match beans.create(header.type_id) {
            Some(mut bean) => match decode_body(recv, &header, bean.as_mut()) {
                Ok(()) => frames.push(Decoded::Bean { header, bean }),
                Err(e) => break Some(e.into()),
            },
            None if config.unknown_type_policy == UnknownTypePolicy::Tolerant => match recv.unmarshal_raw(length) {
                Ok(raw) => frames.push(Decoded::Unknown {
                    header,
                    raw: raw.to_vec(),
                }),
                Err(e) => break Some(e.into()),
            },
            None => break Some(BeanwireError::UnknownType(header.type_id)),
        }
    };
    recv.compact();
    (frames, failure)
}

#[cfg(test)]
mod tests {
    use beanwire_codec::DynBean;

    use super::*;

    fn frame(type_id: u32, serial: i32, payload: &[u8]) -> Vec<u8> {
        encode_frame(&RawBean::new(type_id, payload.to_vec()), serial)
            .unwrap()
            .as_slice()
            .to_vec()
    }

    fn registry() -> BeanRegistry {
        let mut beans = BeanRegistry::new();
        beans.register_with(1, || Box::new(DynBean::new(1)));
        beans
    }

    #[test]
    fn test_extract_frames_keeps_incomplete_tail() {
        let mut bytes = frame(1, 0, &[0x04, 0x05, 0x00]);
        let second = frame(1, 3, &[0x00]);
        bytes.extend_from_slice(&second[..2]);
        let mut recv = Cursor::from_slice(&bytes);

        let (frames, failure) = extract_frames(&mut recv, &registry(), &DispatcherConfig::default());

        assert!(failure.is_none());
        assert_eq!(frames.len(), 1);
        assert_eq!(recv.position(), 0);
        assert_eq!(recv.as_slice(), &second[..2]);
    }

    #[test]
    fn test_extract_frames_oversize_length_fails_before_payload_arrives() {
        // Header claims 70000 bytes; nothing of the payload is buffered.
        let mut recv = Cursor::new();
        FrameHeader {
            type_id: 1,
            serial: 0,
            length: 70_000,
        }
        .write(&mut recv);

        let (frames, failure) = extract_frames(&mut recv, &registry(), &DispatcherConfig::default());

        assert!(frames.is_empty());
        assert!(matches!(
            failure,
            Some(BeanwireError::Codec(CodecError::FrameTooLarge { length: 70_000, .. }))
        ));
    }

    #[test]
    fn test_extract_frames_strict_unknown_type_fails() {
        let mut recv = Cursor::from_slice(&frame(77, 0, &[0x00]));

        let (_, failure) = extract_frames(&mut recv, &registry(), &DispatcherConfig::default());

        assert!(matches!(failure, Some(BeanwireError::UnknownType(77))));
    }

    #[test]
    fn test_extract_frames_tolerant_unknown_type_copies_payload() {
        let config = DispatcherConfig {
            unknown_type_policy: UnknownTypePolicy::Tolerant,
            ..Default::default()
        };
        let mut bytes = frame(77, 0, &[1, 2, 3]);
        bytes.extend(frame(1, 0, &[0x00]));
        let mut recv = Cursor::from_slice(&bytes);

        let (frames, failure) = extract_frames(&mut recv, &registry(), &config);

        assert!(failure.is_none());
        assert!(matches!(&frames[0], Decoded::Unknown { raw, .. } if raw == &[1, 2, 3]));
        assert!(matches!(&frames[1], Decoded::Bean { header, .. } if header.type_id == 1));
        assert!(recv.is_empty());
    }
}
