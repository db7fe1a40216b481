//! Cortices and helpers shared by the session integration tests.

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cortical::transport::memory::{self, MemoryPeer};
use cortical::{
    Binding, Consumer, Cortex, CortexError, CortexRegistry, Hub, Message, SESSION_ID_KEY,
    SessionContext, SessionSummary,
};
use cortical_core::HubConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// What a [`Collector`] saw: cortex name, session id, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub cortex: String,
    pub session: String,
    pub message: Message,
}

/// Records every inbound message, optionally pausing per message.
pub struct Collector {
    name: String,
    delay: Option<Duration>,
    tx: mpsc::UnboundedSender<Seen>,
}

impl Collector {
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.to_string(),
                delay: None,
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct CollectorConsumer {
    name: String,
    delay: Option<Duration>,
    tx: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Consumer for CollectorConsumer {
    async fn consume(&mut self, session: &SessionContext, message: Message) -> Result<(), CortexError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.tx.send(Seen {
            cortex: self.name.clone(),
            session: session.get(SESSION_ID_KEY).unwrap_or_default().to_string(),
            message,
        });
        Ok(())
    }
}

impl Cortex for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, _session: &SessionContext) -> Binding {
        Binding::inert().with_consumer(CollectorConsumer {
            name: self.name.clone(),
            delay: self.delay,
            tx: self.tx.clone(),
        })
    }
}

/// Emits a fixed list of messages on bind, then closes its producer.
pub struct Scripted {
    name: String,
    script: Vec<Message>,
}

impl Scripted {
    pub fn new(name: &str, script: impl IntoIterator<Item = Message>) -> Self {
        Self {
            name: name.to_string(),
            script: script.into_iter().collect(),
        }
    }
}

impl Cortex for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, _session: &SessionContext) -> Binding {
        let (tx, rx) = mpsc::channel(1);
        let script = self.script.clone();
        tokio::spawn(async move {
            for message in script {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        Binding::inert().with_producer(rx)
    }
}

/// Answers `"test"` with `"pong"` through its own producer.
pub struct Pong;

struct PongConsumer(mpsc::Sender<Message>);

#[async_trait]
impl Consumer for PongConsumer {
    async fn consume(&mut self, _session: &SessionContext, message: Message) -> Result<(), CortexError> {
        if message == "test" {
            self.0
                .send(Bytes::from_static(b"pong"))
                .await
                .map_err(|_| CortexError::failed("session output closed"))?;
        }
        Ok(())
    }
}

impl Cortex for Pong {
    fn name(&self) -> &str {
        "pong"
    }

    fn bind(&self, _session: &SessionContext) -> Binding {
        let (tx, rx) = mpsc::channel(1);
        Binding::inert()
            .with_producer(rx)
            .with_consumer(PongConsumer(tx))
    }
}

/// How a [`Faulty`] consumer misbehaves on every message.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Error,
    Panic,
    Hang,
}

pub struct Faulty(pub Fault);

struct FaultyConsumer(Fault);

#[async_trait]
impl Consumer for FaultyConsumer {
    #[allow(clippy::panic)]
    async fn consume(&mut self, _session: &SessionContext, _message: Message) -> Result<(), CortexError> {
        match self.0 {
            Fault::Error => Err(CortexError::failed("refused")),
            Fault::Panic => panic!("faulty consumer"),
            Fault::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

impl Cortex for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn bind(&self, _session: &SessionContext) -> Binding {
        Binding::inert().with_consumer(FaultyConsumer(self.0))
    }
}

/// Start one session over an in-memory transport.
pub fn start(
    registry: CortexRegistry,
    config: HubConfig,
) -> (Hub, MemoryPeer, JoinHandle<SessionSummary>) {
    let hub = Hub::new(registry, config).unwrap();
    let (transport, peer) = memory::pair();
    let session = tokio::spawn({
        let hub = hub.clone();
        async move { hub.serve(transport).await }
    });
    (hub, peer, session)
}

/// Await the session with a timeout.
pub async fn finish(session: JoinHandle<SessionSummary>) -> SessionSummary {
    tokio::time::timeout(TIMEOUT, session)
        .await
        .expect("session did not finish in time")
        .unwrap()
}

/// Receive exactly `n` records, failing on timeout.
pub async fn take(rx: &mut mpsc::UnboundedReceiver<Seen>, n: usize) -> Vec<Seen> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let seen = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for consumer")
            .expect("collector dropped");
        out.push(seen);
    }
    out
}

pub fn text(s: &str) -> Message {
    Bytes::copy_from_slice(s.as_bytes())
}
