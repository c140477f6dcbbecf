//! End-to-end ask/reply between two dispatchers over loopback TCP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beanwire::prelude::*;

#[derive(Debug, Default, Clone, PartialEq)]
struct Echo {
    text: String,
    count: i64,
}

impl Bean for Echo {
    fn bean_type(&self) -> u32 {
        Self::TYPE
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

/// Records where the server ended up listening and which sessions the
/// client opened.
#[derive(Default, Clone)]
struct Addresses {
    listening: Arc<Mutex<Option<SocketAddr>>>,
    opened: Arc<Mutex<Vec<SessionId>>>,
}

impl SessionListener for Addresses {
    fn on_listening(&self, _: &mut Dispatcher, addr: SocketAddr) {
        *self.listening.lock().unwrap() = Some(addr);
    }

    fn on_open(&self, _: &mut Dispatcher, session: SessionId, _: SocketAddr, origin: Origin) {
        if origin == Origin::Connected {
            self.opened.lock().unwrap().push(session);
        }
    }
}

/// Ticks both dispatchers until `done` holds or five seconds pass.
async fn pump(a: &mut Dispatcher, b: &mut Dispatcher, done: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting");
        a.tick();
        b.tick();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ask_over_tcp_gets_reply() {
    let server_events = Addresses::default();
    let mut server = Dispatcher::builder()
        .listener(server_events.clone())
        .on::<Echo, _>(|d, req| {
            let reply = Echo {
                text: req.bean.text.to_uppercase(),
                count: req.bean.count + 1,
            };
            d.reply(req.session, req.serial, &reply).unwrap();
        })
        .build()
        .unwrap();

    let client_events = Addresses::default();
    let mut client = Dispatcher::builder()
        .listener(client_events.clone())
        .bean::<Echo>()
        .build()
        .unwrap();

    server.listen("127.0.0.1", 0);
    let listening = Arc::clone(&server_events.listening);
    pump(&mut server, &mut client, || listening.lock().unwrap().is_some()).await;
    let port = server_events.listening.lock().unwrap().unwrap().port();

    client.connect("127.0.0.1", port);
    let opened = Arc::clone(&client_events.opened);
    pump(&mut server, &mut client, || !opened.lock().unwrap().is_empty()).await;
    let session = client_events.opened.lock().unwrap()[0];

    let answer: Arc<Mutex<Option<Echo>>> = Arc::default();
    let slot = Arc::clone(&answer);
    let request = Echo {
        text: "héllo wire".into(),
        count: 41,
    };
    client
        .ask(session, &request, move |_, reply| {
            let reply = reply.and_then(|b| b.downcast::<Echo>().ok()).map(|b| *b);
            *slot.lock().unwrap() = reply;
        })
        .unwrap();

    let done = Arc::clone(&answer);
    pump(&mut server, &mut client, || done.lock().unwrap().is_some()).await;

    let reply = answer.lock().unwrap().clone().unwrap();
    assert_eq!(reply.text, "HÉLLO WIRE");
    assert_eq!(reply.count, 42);
    assert_eq!(client.pending_asks(), 0);

    client.shutdown();
    server.shutdown();
}
