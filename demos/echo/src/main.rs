use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use beanwire::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Beans
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct Echo {
    text: String,
    count: i64,
}

impl Bean for Echo {
    fn bean_type(&self) -> u32 {
        Self::TYPE
    }

    fn init_size(&self) -> usize {
        self.text.len() + 16
    }

    fn marshal(&self, out: &mut Cursor) {
        out.marshal_str_field(1, &self.text)
            .marshal_i64_field(2, self.count)
            .marshal_u8(0);
    }

    fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
        while let Some(tag) = input.unmarshal_tag()? {
            match tag.id {
                1 => self.text = input.read_string(tag.wire)?,
                2 => self.count = input.read_i64(tag.wire)?,
                _ => input.skip_var(tag.wire)?,
            }
        }
        Ok(())
    }
}

impl BeanType for Echo {
    const TYPE: u32 = 10;
}

/// Free-form note, decoded as a dynamic bean on the server.
const NOTE_TYPE: u32 = 21;
/// A type only the client knows; the server skips it.
const UNKNOWN_TYPE: u32 = 30;
const ROUNDS: usize = 3;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct ServerEvents;

impl SessionListener for ServerEvents {
    fn on_open(&self, _: &mut Dispatcher, session: SessionId, peer: SocketAddr, _: Origin) {
        info!(%session, %peer, "client connected");
    }

    fn on_close(&self, _: &mut Dispatcher, session: SessionId, reason: CloseReason) {
        info!(%session, %reason, "client gone");
    }

    fn on_unknown_frame(&self, _: &mut Dispatcher, session: SessionId, header: &FrameHeader, raw: &[u8]) {
        info!(%session, type_id = header.type_id, bytes = raw.len(), "skipped unknown frame");
    }
}

fn server(config: DispatcherConfig) -> Result<Dispatcher, BeanwireError> {
    Dispatcher::builder()
        .config(DispatcherConfig {
            unknown_type_policy: UnknownTypePolicy::Tolerant,
            ..config
        })
        .listener(ServerEvents)
        .on::<Echo, _>(|d, req| {
            let reply = Echo {
                text: req.bean.text.chars().rev().collect(),
                count: req.bean.count + 1,
            };
            if let Err(e) = d.reply(req.session, req.serial, &reply) {
                warn!(session = %req.session, error = %e, "reply failed");
            }
        })
        .bean_with(NOTE_TYPE, || Box::new(DynBean::new(NOTE_TYPE)))
        .handler(NOTE_TYPE, |_, incoming| {
            let Some(note) = incoming.bean.downcast_ref::<DynBean>() else {
                return;
            };
            match note.to_json() {
                Ok(json) => info!(session = %incoming.session, %json, "note"),
                Err(e) => warn!(error = %e, "note not printable"),
            }
        })
        .build()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

fn send_note(d: &mut Dispatcher, session: SessionId) -> Result<(), BeanwireError> {
    let mut note = DynBean::new(NOTE_TYPE);
    note.set(1, "hello from the client")?;
    note.set(2, Value::List(vec![1i64.into(), 2i64.into(), 3i64.into()]))?;
    d.send(session, &note)
}

struct ClientEvents {
    answered: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
}

impl SessionListener for ClientEvents {
    fn on_open(&self, d: &mut Dispatcher, session: SessionId, peer: SocketAddr, _: Origin) {
        info!(%session, %peer, "connected");

        if let Err(e) = send_note(d, session) {
            warn!(error = %e, "note not sent");
        }
        if let Err(e) = d.send(session, &DynBean::new(UNKNOWN_TYPE)) {
            warn!(error = %e, "unknown-type frame not sent");
        }

        for round in 0..ROUNDS {
            let request = Echo {
                text: format!("round {round}"),
                count: round as i64,
            };
            let answered = Arc::clone(&self.answered);
            let done = Arc::clone(&self.done);
            let sent = d.ask(session, &request, move |_, reply| {
                match reply.and_then(|b| b.downcast::<Echo>().ok()) {
                    Some(echo) => info!(text = %echo.text, count = echo.count, "echo"),
                    None => info!(round, "no answer"),
                }
                if answered.fetch_add(1, Ordering::SeqCst) + 1 == ROUNDS {
                    done.store(true, Ordering::SeqCst);
                }
            });
            if let Err(e) = sent {
                warn!(round, error = %e, "ask not sent");
            }
        }
    }

    fn on_open_failed(&self, _: &mut Dispatcher, addr: &str, _: Origin, error: &TransportError) {
        tracing::error!(%addr, %error, "could not connect");
        self.done.store(true, Ordering::SeqCst);
    }

    fn on_close(&self, _: &mut Dispatcher, session: SessionId, reason: CloseReason) {
        info!(%session, %reason, "disconnected");
        self.done.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Reads a JSON `DispatcherConfig` from the file named by
/// `BEANWIRE_CONFIG`, or returns the defaults.
fn load_config() -> Result<DispatcherConfig, Box<dyn std::error::Error>> {
    match std::env::var("BEANWIRE_CONFIG") {
        Ok(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        Err(_) => Ok(DispatcherConfig::default()),
    }
}

/// Ticks `dispatcher` every few milliseconds until `stop` is set or
/// Ctrl-C is pressed.
async fn drive(dispatcher: &mut Dispatcher, stop: &AtomicBool) {
    let mut interval = tokio::time::interval(Duration::from_millis(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while !stop.load(Ordering::SeqCst) {
        tokio::select! {
            _ = interval.tick() => {
                dispatcher.tick();
            }
            _ = &mut ctrl_c => break,
        }
    }
    dispatcher.shutdown();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("server") => {
            let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(9000);
            let mut dispatcher = server(config)?;
            dispatcher.listen("0.0.0.0", port);
            drive(&mut dispatcher, &AtomicBool::new(false)).await;
        }
        Some("client") => {
            let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
            let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(9000);
            let done = Arc::new(AtomicBool::new(false));
            let mut dispatcher = Dispatcher::builder()
                .config(config)
                .bean::<Echo>()
                .listener(ClientEvents {
                    answered: Arc::new(AtomicUsize::new(0)),
                    done: Arc::clone(&done),
                })
                .build()?;
            dispatcher.connect(&host, port);
            drive(&mut dispatcher, &done).await;
        }
        _ => eprintln!("usage: echo server [port] | echo client [host] [port]"),
    }
    Ok(())
}
