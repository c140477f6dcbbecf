//! TCP transport over `tokio::net`.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::{EventSink, IoEvent, Link, Origin, SessionId, Transport, TransportError};

/// Read buffer size used when none is configured.
pub const DEFAULT_RECV_CHUNK_SIZE: usize = 32 * 1024;

/// Pause after a failed accept so a persistent error (fd exhaustion, for
/// one) does not spin the listener.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// An accept loop and the address it bound, once known.
#[derive(Debug)]
struct ListenerTask {
    local: Arc<OnceLock<SocketAddr>>,
    task: AbortHandle,
}

/// A [`Transport`] that runs every socket operation as a task on a Tokio
/// runtime.
#[derive(Debug)]
pub struct TcpTransport {
    runtime: Handle,
    recv_chunk_size: usize,
    next_id: Arc<AtomicU64>,
    listeners: Mutex<Vec<ListenerTask>>,
}

impl TcpTransport {
    /// Creates a transport that spawns its tasks on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            recv_chunk_size: DEFAULT_RECV_CHUNK_SIZE,
            next_id: Arc::new(AtomicU64::new(1)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Creates a transport on the runtime of the calling context.
    ///
    /// # Errors
    /// [`TransportError::NoRuntime`] outside of a Tokio runtime.
    pub fn current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| TransportError::NoRuntime)
    }

    /// Sets how many bytes each read asks the socket for.
    pub fn with_recv_chunk_size(mut self, size: usize) -> Self {
        self.recv_chunk_size = size.max(1);
        self
    }

    fn context(&self, sink: EventSink) -> SessionContext {
        SessionContext {
            next_id: Arc::clone(&self.next_id),
            recv_chunk_size: self.recv_chunk_size,
            sink,
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16, sink: EventSink) {
        let host = host.to_string();
        let ctx = self.context(sink);
        self.runtime.spawn(async move {
            let addr = format!("{host}:{port}");
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => match stream.peer_addr() {
                    Ok(peer) => ctx.open(stream, peer, Origin::Connected),
                    Err(e) => ctx.open_failed(addr, Origin::Connected, TransportError::ConnectFailed(e)),
                },
                Err(e) => ctx.open_failed(addr, Origin::Connected, TransportError::ConnectFailed(e)),
            }
        });
    }

    fn listen(&self, host: &str, port: u16, backlog: u32, sink: EventSink) {
        let host = host.to_string();
        let ctx = self.context(sink);
        let local_slot = Arc::new(OnceLock::new());
        let bound = Arc::clone(&local_slot);
        let handle = self.runtime.spawn(async move {
            let addr = format!("{host}:{port}");
            let listener = match bind(&host, port, backlog).await {
                Ok(listener) => listener,
                Err(e) => return ctx.open_failed(addr, Origin::Accepted, e),
            };
            let local = match listener.local_addr() {
                Ok(local) => local,
                Err(e) => return ctx.open_failed(addr, Origin::Accepted, TransportError::AcceptFailed(e)),
            };
            let _ = bound.set(local);
            tracing::info!(%local, "TCP transport listening");
            ctx.sink.push(IoEvent::Listening { addr: local });

            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => ctx.open(stream, peer, Origin::Accepted),
                    Err(e) => {
                        tracing::warn!(%local, error = %e, "accept failed");
                        ctx.open_failed(local.to_string(), Origin::Accepted, TransportError::AcceptFailed(e));
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        });
        let mut listeners = lock_listeners(&self.listeners);
        listeners.retain(|l| !l.task.is_finished());
        listeners.push(ListenerTask {
            local: local_slot,
            task: handle.abort_handle(),
        });
    }

    fn stop_listening(&self, addr: SocketAddr) -> bool {
        let mut listeners = lock_listeners(&self.listeners);
        let Some(index) = listeners.iter().position(|l| l.local.get() == Some(&addr)) else {
            return false;
        };
        listeners.swap_remove(index).task.abort();
        tracing::info!(%addr, "TCP transport stopped listening");
        true
    }

    fn shutdown(&self) {
        let listeners = std::mem::take(&mut *lock_listeners(&self.listeners));
        tracing::debug!(count = listeners.len(), "stopping listeners");
        for listener in listeners {
            listener.task.abort();
        }
    }
}

fn lock_listeners(listeners: &Mutex<Vec<ListenerTask>>) -> std::sync::MutexGuard<'_, Vec<ListenerTask>> {
    // An abort handle list cannot be left half-updated, so a poisoned lock
    // is still usable.
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn bind(host: &str, port: u16, backlog: u32) -> Result<TcpListener, TransportError> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(TransportError::AcceptFailed)?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(format!("{host}:{port}")))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(TransportError::AcceptFailed)?;
    socket.set_reuseaddr(true).map_err(TransportError::AcceptFailed)?;
    socket.bind(addr).map_err(TransportError::AcceptFailed)?;
    socket.listen(backlog).map_err(TransportError::AcceptFailed)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Everything a connect or accept task needs to open a session.
struct SessionContext {
    next_id: Arc<AtomicU64>,
    recv_chunk_size: usize,
    sink: EventSink,
}

impl SessionContext {
    fn open_failed(&self, addr: String, origin: Origin, error: TransportError) {
        tracing::debug!(%addr, ?origin, %error, "open failed");
        self.sink.push(IoEvent::OpenFailed { addr, origin, error });
    }

    /// Publishes the session and then starts its reader, so `Opened` is
    /// always queued before the first `Received`.
    fn open(&self, stream: TcpStream, peer: SocketAddr, origin: Origin) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }
        let session = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();
        let closed = Arc::new(Notify::new());
        tracing::debug!(%session, %peer, ?origin, "TCP session opened");

        let link = TcpLink {
            session,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            closed: Arc::clone(&closed),
            sink: self.sink.clone(),
            runtime: Handle::current(),
        };
        self.sink.push(IoEvent::Opened {
            session,
            peer,
            origin,
            link: Box::new(link),
        });

        tokio::spawn(read_loop(session, reader, self.recv_chunk_size, closed, self.sink.clone()));
    }
}

async fn read_loop(
    session: SessionId,
    mut reader: OwnedReadHalf,
    chunk_size: usize,
    closed: Arc<Notify>,
    sink: EventSink,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let result = tokio::select! {
            _ = closed.notified() => {
                tracing::trace!(%session, "reader stopped by close");
                return;
            }
            result = reader.read(&mut buf) => result,
        };
        match result {
            Ok(0) => {
                sink.push(IoEvent::ReadFailed {
                    session,
                    error: TransportError::ConnectionClosed("end of stream".into()),
                });
                return;
            }
            Ok(n) => sink.push(IoEvent::Received {
                session,
                data: buf[..n].to_vec(),
            }),
            Err(e) => {
                sink.push(IoEvent::ReadFailed {
                    session,
                    error: TransportError::ReceiveFailed(e),
                });
                return;
            }
        }
    }
}

/// Write side of one TCP session.
#[derive(Debug)]
struct TcpLink {
    session: SessionId,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    closed: Arc<Notify>,
    sink: EventSink,
    runtime: Handle,
}

impl Link for TcpLink {
    fn write(&self, data: Bytes) {
        let writer = Arc::clone(&self.writer);
        let sink = self.sink.clone();
        let session = self.session;
        self.runtime.spawn(async move {
            let result: io::Result<()> = writer.lock().await.write_all(&data).await;
            let event = match result {
                Ok(()) => IoEvent::Written {
                    session,
                    bytes: data.len(),
                },
                Err(e) => IoEvent::WriteFailed {
                    session,
                    error: TransportError::SendFailed(e),
                },
            };
            sink.push(event);
        });
    }

    fn close(&self) {
        // notify_one keeps a permit, so a reader that is between reads
        // still sees it.
        self.closed.notify_one();
        let writer = Arc::clone(&self.writer);
        let session = self.session;
        self.runtime.spawn(async move {
            if let Err(e) = writer.lock().await.shutdown().await {
                tracing::trace!(%session, error = %e, "shutdown after close failed");
            }
        });
    }
}
