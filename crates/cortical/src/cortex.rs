//! Cortex contract and registry.
//!
//! A [`Cortex`] is registered once and bound once per session. Binding
//! yields an optional producer (a bounded channel the cortex writes outbound
//! messages into) and an optional [`Consumer`] that is awaited once per
//! inbound message.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Message;
use crate::session::SessionContext;

/// Outbound message source of one binding.
pub type Producer = mpsc::Receiver<Message>;

/// Failures reported by (or imposed on) a consumer invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CortexError {
    #[error("{0}")]
    Failed(String),

    #[error("consumer panicked")]
    Panicked,

    #[error("consumer exceeded {0:?}")]
    TimedOut(Duration),
}

impl CortexError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Inbound side of a binding.
#[async_trait]
pub trait Consumer: Send + 'static {
    async fn consume(
        &mut self,
        session: &SessionContext,
        message: Message,
    ) -> Result<(), CortexError>;
}

/// A pluggable processor. `bind` must create fresh state for every session.
pub trait Cortex: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn bind(&self, session: &SessionContext) -> Binding;
}

/// What one cortex contributes to one session.
#[derive(Default)]
pub struct Binding {
    producer: Option<Producer>,
    consumer: Option<Box<dyn Consumer>>,
}

impl Binding {
    /// Binding that takes part in neither direction.
    pub fn inert() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_producer(mut self, producer: Producer) -> Self {
        self.producer = Some(producer);
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Consumer) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    pub const fn is_inert(&self) -> bool {
        self.producer.is_none() && self.consumer.is_none()
    }

    pub fn into_parts(self) -> (Option<Producer>, Option<Box<dyn Consumer>>) {
        (self.producer, self.consumer)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("producer", &self.producer.is_some())
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}

/// Consumer backed by a closure. Handy for cortices whose inbound side is a
/// single synchronous step.
pub struct FnConsumer<F>(pub F);

#[async_trait]
impl<F> Consumer for FnConsumer<F>
where
    F: FnMut(&SessionContext, Message) -> Result<(), CortexError> + Send + 'static,
{
    async fn consume(
        &mut self,
        session: &SessionContext,
        message: Message,
    ) -> Result<(), CortexError> {
        (self.0)(session, message)
    }
}

/// A binding tagged with the cortex that produced it.
#[derive(Debug)]
pub struct BoundCortex {
    pub name: String,
    pub binding: Binding,
}

/// Ordered set of cortices served to every session.
#[derive(Clone, Default)]
pub struct CortexRegistry {
    cortices: Vec<Arc<dyn Cortex>>,
}

impl CortexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cortex. Order is kept but carries no priority.
    pub fn register(&mut self, cortex: impl Cortex) -> &mut Self {
        self.cortices.push(Arc::new(cortex));
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, cortex: impl Cortex) -> Self {
        self.register(cortex);
        self
    }

    pub fn len(&self) -> usize {
        self.cortices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cortices.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.cortices.iter().map(|c| c.name()).collect()
    }

    /// Bind every cortex to `session`, in registration order.
    pub fn bind_all(&self, session: &SessionContext) -> Vec<BoundCortex> {
        self.cortices
            .iter()
            .map(|cortex| BoundCortex {
                name: cortex.name().to_string(),
                binding: cortex.bind(session),
            })
            .collect()
    }
}

impl fmt::Debug for CortexRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;

    struct Counting {
        binds: Arc<AtomicUsize>,
    }

    impl Cortex for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn bind(&self, _session: &SessionContext) -> Binding {
            self.binds.fetch_add(1, Ordering::SeqCst);
            let (_tx, rx) = mpsc::channel(1);
            Binding::inert().with_producer(rx)
        }
    }

    struct Silent;

    impl Cortex for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn bind(&self, _session: &SessionContext) -> Binding {
            Binding::inert()
        }
    }

    #[test]
    fn registration_order_is_kept() {
        let binds = Arc::new(AtomicUsize::new(0));
        let registry = CortexRegistry::new()
            .with(Silent)
            .with(Counting {
                binds: Arc::clone(&binds),
            });
        assert_eq!(registry.names(), vec!["silent", "counting"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn bind_all_binds_each_cortex_once() {
        let binds = Arc::new(AtomicUsize::new(0));
        let registry = CortexRegistry::new().with(Counting {
            binds: Arc::clone(&binds),
        });

        let session = SessionContext::mint();
        let bound = registry.bind_all(&session);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].name, "counting");
        assert!(!bound[0].binding.is_inert());
        assert_eq!(binds.load(Ordering::SeqCst), 1);

        registry.bind_all(&SessionContext::mint());
        assert_eq!(binds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inert_binding_has_no_parts() {
        let (producer, consumer) = Binding::inert().into_parts();
        assert!(producer.is_none());
        assert!(consumer.is_none());
    }

    #[tokio::test]
    async fn fn_consumer_forwards_calls() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut consumer = FnConsumer(
            move |_: &SessionContext, msg: Message| -> Result<(), CortexError> {
                counter.fetch_add(msg.len(), Ordering::SeqCst);
                Ok(())
            },
        );
        let session = SessionContext::mint();
        consumer
            .consume(&session, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cortex_error_messages() {
        assert_eq!(CortexError::failed("boom").to_string(), "boom");
        assert_eq!(CortexError::Panicked.to_string(), "consumer panicked");
    }
}
