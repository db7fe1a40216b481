//! Shared, cloneable entry point for serving sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cortical_core::HubConfig;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cortex::CortexRegistry;
use crate::orchestrator::{Orchestrator, SessionSummary};
use crate::session::{Lifecycle, SessionState};
use crate::transport::Transport;

/// Called with a state receiver for every session the hub opens, including
/// upgrades that fail before the session starts.
pub type LifecycleHook = Arc<dyn Fn(watch::Receiver<SessionState>) + Send + Sync>;

/// Serves every accepted connection with the same cortices and settings.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
    hook: Option<LifecycleHook>,
}

struct HubInner {
    orchestrator: Orchestrator,
    cortices: usize,
    shutdown: CancellationToken,
    active: AtomicUsize,
    started: Instant,
}

impl Hub {
    /// Build a hub. Fails if `config` is invalid.
    pub fn new(registry: CortexRegistry, config: HubConfig) -> cortical_core::Result<Self> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let cortices = registry.len();
        info!(cortices = ?registry.names(), "Hub ready");
        Ok(Self {
            inner: Arc::new(HubInner {
                orchestrator: Orchestrator::new(
                    Arc::new(registry),
                    Arc::new(config),
                    shutdown.clone(),
                ),
                cortices,
                shutdown,
                active: AtomicUsize::new(0),
                started: Instant::now(),
            }),
            hook: None,
        })
    }

    /// Report the lifecycle of every session opened from now on to `hook`.
    #[must_use]
    pub fn on_lifecycle<F>(mut self, hook: F) -> Self
    where
        F: Fn(watch::Receiver<SessionState>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Fresh lifecycle in `Handshaking`, announced to the hook if one is set.
    pub fn open_lifecycle(&self) -> Lifecycle {
        let lifecycle = Lifecycle::new();
        if let Some(hook) = &self.hook {
            hook(lifecycle.subscribe());
        }
        lifecycle
    }

    /// Drain every live session.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn cortex_count(&self) -> usize {
        self.inner.cortices
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Run one session over `transport`.
    pub async fn serve<T: Transport>(&self, transport: T) -> SessionSummary {
        let lifecycle = self.open_lifecycle();
        self.serve_with(transport, &lifecycle).await
    }

    /// Like [`serve`](Self::serve), reporting state changes on `lifecycle`.
    pub async fn serve_with<T: Transport>(
        &self,
        transport: T,
        lifecycle: &Lifecycle,
    ) -> SessionSummary {
        let _guard = ActiveGuard::enter(&self.inner.active);
        self.inner.orchestrator.run(transport, lifecycle).await
    }
}

/// Keeps the active-session counter right even if the session future is
/// dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::signal::CloseReason;
    use crate::transport::CloseCode;
    use crate::transport::memory;

    #[test]
    fn invalid_config_is_rejected() {
        let config = HubConfig {
            subscriber_buffer: 0,
            ..HubConfig::default()
        };
        assert!(Hub::new(CortexRegistry::new(), config).is_err());
    }

    #[tokio::test]
    async fn active_sessions_are_counted() {
        let hub = Hub::new(CortexRegistry::new(), HubConfig::default()).unwrap();
        let (transport, peer) = memory::pair();

        let session = tokio::spawn({
            let hub = hub.clone();
            async move { hub.serve(transport).await }
        });
        while hub.active_sessions() == 0 {
            tokio::task::yield_now().await;
        }

        peer.close(CloseCode::NORMAL);
        let summary = session.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Peer(CloseCode::NORMAL));
        assert_eq!(hub.active_sessions(), 0);
    }

    #[tokio::test]
    async fn lifecycle_hook_sees_every_session() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hub = Hub::new(CortexRegistry::new(), HubConfig::default())
            .unwrap()
            .on_lifecycle({
                let seen = Arc::clone(&seen);
                move |rx| seen.lock().unwrap().push(rx)
            });
        let (transport, peer) = memory::pair();
        peer.close(CloseCode::NORMAL);
        hub.serve(transport).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(*seen[0].borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn shutdown_drains_live_sessions() {
        let hub = Hub::new(CortexRegistry::new(), HubConfig::default()).unwrap();
        let (transport, _peer) = memory::pair();

        let session = tokio::spawn({
            let hub = hub.clone();
            async move { hub.serve(transport).await }
        });
        while hub.active_sessions() == 0 {
            tokio::task::yield_now().await;
        }

        hub.shutdown();
        assert!(hub.is_shutting_down());
        let summary = session.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Shutdown);
    }
}
