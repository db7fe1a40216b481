//! Echo cortex: answers every inbound message on the same session.
//!
//! By default each message is answered with `"pong"`. [`EchoCortex::mirror`]
//! sends the inbound message back unchanged instead.

use async_trait::async_trait;
use bytes::Bytes;
use cortical::{Binding, Consumer, Cortex, CortexError, Message, SessionContext};
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_REPLY: &str = "pong";

/// What the cortex sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoMode {
    /// Fixed reply regardless of input.
    Reply(Bytes),
    /// The inbound message itself.
    Mirror,
}

#[derive(Debug, Clone)]
pub struct EchoCortex {
    mode: EchoMode,
    buffer: usize,
}

impl Default for EchoCortex {
    fn default() -> Self {
        Self::pong()
    }
}

impl EchoCortex {
    pub const fn pong() -> Self {
        Self::reply(Bytes::from_static(DEFAULT_REPLY.as_bytes()))
    }

    pub const fn reply(reply: Bytes) -> Self {
        Self {
            mode: EchoMode::Reply(reply),
            buffer: 1,
        }
    }

    pub const fn mirror() -> Self {
        Self {
            mode: EchoMode::Mirror,
            buffer: 1,
        }
    }

    /// Depth of the per-session reply channel.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub const fn mode(&self) -> &EchoMode {
        &self.mode
    }
}

impl Cortex for EchoCortex {
    fn name(&self) -> &str {
        "echo"
    }

    fn bind(&self, session: &SessionContext) -> Binding {
        let (replies, producer) = mpsc::channel(self.buffer);
        debug!(session_id = %session.id(), "Echo bound");
        Binding::inert()
            .with_producer(producer)
            .with_consumer(EchoConsumer {
                mode: self.mode.clone(),
                replies,
            })
    }
}

struct EchoConsumer {
    mode: EchoMode,
    replies: mpsc::Sender<Message>,
}

#[async_trait]
impl Consumer for EchoConsumer {
    async fn consume(
        &mut self,
        session: &SessionContext,
        message: Message,
    ) -> Result<(), CortexError> {
        debug!(session_id = %session.id(), bytes = message.len(), "Echo received");
        let reply = match &self.mode {
            EchoMode::Reply(reply) => reply.clone(),
            EchoMode::Mirror => message,
        };
        if self.replies.send(reply).await.is_err() {
            // merge already stopped; the session is draining
            debug!("Echo reply dropped");
        }
        Ok(())
    }
}
