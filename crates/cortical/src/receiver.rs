//! Receive adapter: drives one consumer from its fan-out stream.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cortical_core::FailurePolicy;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::Message;
use crate::cortex::{Consumer, CortexError};
use crate::session::SessionContext;
use crate::signal::{CloseOnce, CloseReason};

/// How an adapter loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterExit {
    /// The stop signal fired.
    Stopped,
    /// The fan-out closed the subscriber stream.
    InputClosed,
    /// The consumer failed and the adapter gave up on it.
    Failed,
}

pub struct ReceiveAdapter {
    pub name: String,
    pub consumer: Box<dyn Consumer>,
    pub inbox: mpsc::Receiver<Message>,
    pub stop: CancellationToken,
    pub session: SessionContext,
    pub timeout: Option<Duration>,
    pub policy: FailurePolicy,
    pub closer: Arc<CloseOnce>,
}

impl ReceiveAdapter {
    pub fn spawn(self) -> JoinHandle<AdapterExit> {
        let span = info_span!("cortex", cortex = %self.name);
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) -> AdapterExit {
        let mut handled: u64 = 0;
        let exit = loop {
            let message = tokio::select! {
                biased;
                () = self.stop.cancelled() => break AdapterExit::Stopped,
                message = self.inbox.recv() => match message {
                    Some(message) => message,
                    None => break AdapterExit::InputClosed,
                },
            };
            if let Err(e) = self.invoke(message).await {
                warn!(error = %e, policy = ?self.policy, "Cortex consumer failed");
                if self.policy == FailurePolicy::EndSession {
                    self.closer.fire(CloseReason::CortexFailed {
                        cortex: self.name.clone(),
                    });
                }
                break AdapterExit::Failed;
            }
            handled += 1;
        };
        debug!(?exit, handled, "Receive adapter stopped");
        exit
    }

    async fn invoke(&mut self, message: Message) -> Result<(), CortexError> {
        let call = AssertUnwindSafe(self.consumer.consume(&self.session, message)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(CortexError::TimedOut(limit)),
            },
            None => call.await,
        };
        outcome.unwrap_or(Err(CortexError::Panicked))
    }
}
