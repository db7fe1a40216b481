//! Per-session orchestration.
//!
//! Wires one transport to the registered cortices:
//!
//! ```text
//! read loop -> inbound -> fan-out -> receive adapters -> consumers
//! producers -> merge -> outbound -> write loop <- control lane <- read loop
//! ```
//!
//! The session leaves Active when any task fires the shared [`CloseOnce`] or
//! the server shutdown token is cancelled. Teardown then stops merge and the
//! adapters, cancels both I/O loops, sends a close frame and releases the
//! transport. Remaining tasks get `shutdown_grace` to finish before they are
//! aborted.

use std::sync::Arc;

use cortical_core::HubConfig;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::Message;
use crate::cortex::{BoundCortex, Consumer, CortexRegistry, Producer};
use crate::error::ApiError;
use crate::receiver::{AdapterExit, ReceiveAdapter};
use crate::session::{Lifecycle, SessionContext, SessionId, SessionState};
use crate::signal::{CloseOnce, CloseReason, Direction};
use crate::transport::{Frame, FrameReader, FrameWriter, Transport};
use crate::{fanout, merge};

/// Outcome of one session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub reason: CloseReason,
    /// Text messages dispatched to the fan-out.
    pub received: u64,
    /// Messages written to the transport, error replies included.
    pub sent: u64,
}

/// Runs sessions against a fixed registry and configuration.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<CortexRegistry>,
    config: Arc<HubConfig>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub const fn new(
        registry: Arc<CortexRegistry>,
        config: Arc<HubConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            shutdown,
        }
    }

    /// Serve one upgraded connection to completion.
    pub async fn run<T: Transport>(&self, transport: T, lifecycle: &Lifecycle) -> SessionSummary {
        let session = SessionContext::mint();
        let span = info_span!("session", session_id = %session.id());
        self.drive(session, transport, lifecycle)
            .instrument(span)
            .await
    }

    async fn drive<T: Transport>(
        &self,
        session: SessionContext,
        transport: T,
        lifecycle: &Lifecycle,
    ) -> SessionSummary {
        let config = &self.config;
        let closer = Arc::new(CloseOnce::new());

        let (producers, consumers) = split_bindings(self.registry.bind_all(&session));
        let producer_count = producers.len();

        // inbound: read loop -> fan-out -> adapters
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let (inboxes, fanout_task) =
            fanout::spawn(inbound_rx, consumers.len(), config.subscriber_buffer);

        let mut stops = Vec::with_capacity(consumers.len());
        let mut adapters = Vec::with_capacity(consumers.len());
        for ((name, consumer), inbox) in consumers.into_iter().zip(inboxes) {
            let stop = CancellationToken::new();
            stops.push(stop.clone());
            let adapter = ReceiveAdapter {
                name,
                consumer,
                inbox,
                stop,
                session: session.clone(),
                timeout: config.consumer_timeout(),
                policy: config.failure_policy,
                closer: Arc::clone(&closer),
            };
            adapters.push(adapter.spawn());
        }

        // outbound: producers -> merge -> write loop
        let done = CancellationToken::new();
        let (outbound, merge_task) = merge::spawn(producers, done.clone(), config.merge_buffer);

        let (control_tx, control_rx) = mpsc::channel(config.control_buffer);
        let io_cancel = CancellationToken::new();
        let (reader, writer) = transport.split();

        let read_task = tokio::spawn(
            ReadLoop {
                reader,
                inbound: inbound_tx,
                control: control_tx,
                closer: Arc::clone(&closer),
                cancel: io_cancel.clone(),
                max_transient: config.max_transient_errors,
            }
            .run()
            .in_current_span(),
        );
        let write_task = tokio::spawn(
            WriteLoop {
                writer,
                outbound,
                control: control_rx,
                closer: Arc::clone(&closer),
                cancel: io_cancel.clone(),
                max_transient: config.max_transient_errors,
            }
            .run()
            .in_current_span(),
        );

        lifecycle.advance(SessionState::Active);
        info!(
            consumers = stops.len(),
            producers = producer_count,
            "Session active"
        );

        let reason = tokio::select! {
            reason = closer.wait() => reason,
            () = self.shutdown.cancelled() => {
                closer.fire(CloseReason::Shutdown);
                closer.wait().await
            }
        };

        lifecycle.advance(SessionState::Draining);
        info!(%reason, "Session draining");

        done.cancel();
        for stop in &stops {
            stop.cancel();
        }
        io_cancel.cancel();

        let (reader, received) = match read_task.await {
            Ok((reader, received)) => (Some(reader), received),
            Err(e) => {
                warn!(error = %e, "Read loop ended abnormally");
                (None, 0)
            }
        };
        let (writer, sent) = match write_task.await {
            Ok((writer, sent)) => (Some(writer), sent),
            Err(e) => {
                warn!(error = %e, "Write loop ended abnormally");
                (None, 0)
            }
        };

        if let Some(mut writer) = writer {
            let grace = config.shutdown_grace();
            match tokio::time::timeout(grace, writer.close(reason.close_code())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
                Err(_) => debug!("Close handshake timed out"),
            }
        }
        drop(reader);

        self.await_tasks(adapters, fanout_task, merge_task).await;

        lifecycle.advance(SessionState::Closed);
        info!(%reason, received, sent, "Session closed");

        SessionSummary {
            id: session.id().clone(),
            reason,
            received,
            sent,
        }
    }

    /// Wait for the pipeline tasks up to `shutdown_grace`, then abort whatever
    /// is left.
    async fn await_tasks(
        &self,
        adapters: Vec<JoinHandle<AdapterExit>>,
        fanout_task: JoinHandle<()>,
        merge_task: JoinHandle<()>,
    ) {
        let aborts: Vec<AbortHandle> = adapters
            .iter()
            .map(JoinHandle::abort_handle)
            .chain([fanout_task.abort_handle(), merge_task.abort_handle()])
            .collect();

        let drain = async {
            let exits = join_all(adapters).await;
            for (stage, result) in [("fan-out", fanout_task.await), ("merge", merge_task.await)] {
                if let Err(e) = result {
                    warn!(stage, error = %e, "Pipeline stage ended abnormally");
                }
            }
            exits
        };

        let grace = self.config.shutdown_grace();
        match tokio::time::timeout(grace, drain).await {
            Ok(exits) => {
                let failed = exits
                    .iter()
                    .filter(|exit| matches!(exit, Ok(AdapterExit::Failed)))
                    .count();
                debug!(adapters = exits.len(), failed, "Session tasks finished");
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis(),
                    tasks = aborts.len(),
                    "Session tasks outlived shutdown grace, aborting"
                );
                for handle in aborts {
                    handle.abort();
                }
            }
        }
    }
}

type Consumers = Vec<(String, Box<dyn Consumer>)>;

fn split_bindings(bound: Vec<BoundCortex>) -> (Vec<Producer>, Consumers) {
    let mut producers = Vec::new();
    let mut consumers = Vec::new();
    for BoundCortex { name, binding } in bound {
        if binding.is_inert() {
            debug!(cortex = %name, "Cortex binding is inert");
            continue;
        }
        let (producer, consumer) = binding.into_parts();
        if let Some(producer) = producer {
            producers.push(producer);
        }
        if let Some(consumer) = consumer {
            consumers.push((name, consumer));
        }
    }
    (producers, consumers)
}

/// Reads frames and dispatches text into the fan-out.
struct ReadLoop<R> {
    reader: R,
    inbound: mpsc::Sender<Message>,
    control: mpsc::Sender<Message>,
    closer: Arc<CloseOnce>,
    cancel: CancellationToken,
    max_transient: u32,
}

impl<R: FrameReader> ReadLoop<R> {
    async fn run(mut self) -> (R, u64) {
        let mut received: u64 = 0;
        let mut transient: u32 = 0;
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = self.reader.read_frame() => frame,
            };
            match frame {
                Ok(Frame::Text(message)) => {
                    transient = 0;
                    let dispatched = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        sent = self.inbound.send(message) => sent.is_ok(),
                    };
                    if !dispatched {
                        self.closer.fire(CloseReason::EngineFault("fan-out"));
                        break;
                    }
                    received += 1;
                }
                Ok(Frame::Binary(payload)) => {
                    transient = 0;
                    debug!(bytes = payload.len(), "Rejecting binary frame");
                    let reply = ApiError::unsupported_frame().to_message();
                    let queued = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        sent = self.control.send(reply) => sent.is_ok(),
                    };
                    if !queued {
                        self.closer.fire(CloseReason::EngineFault("write loop"));
                        break;
                    }
                }
                Ok(Frame::Control) => {}
                Err(e) if e.is_terminal() => {
                    debug!(error = %e, "Read loop stopping");
                    self.closer.fire(e.into());
                    break;
                }
                Err(e) => {
                    transient += 1;
                    debug!(error = %e, consecutive = transient, "Transient read error");
                    if transient > self.max_transient {
                        self.closer.fire(CloseReason::TransientErrors {
                            direction: Direction::Read,
                            count: transient,
                        });
                        break;
                    }
                }
            }
        }
        (self.reader, received)
    }
}

/// Writes control replies and merged producer output to the transport.
struct WriteLoop<W> {
    writer: W,
    outbound: mpsc::Receiver<Message>,
    control: mpsc::Receiver<Message>,
    closer: Arc<CloseOnce>,
    cancel: CancellationToken,
    max_transient: u32,
}

impl<W: FrameWriter> WriteLoop<W> {
    async fn run(mut self) -> (W, u64) {
        let mut sent: u64 = 0;
        let mut merge_open = true;
        'session: loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(reply) = self.control.recv() => reply,
                message = self.outbound.recv(), if merge_open => match message {
                    Some(message) => message,
                    None => {
                        debug!("All producers finished");
                        merge_open = false;
                        continue;
                    }
                },
            };

            let mut failures: u32 = 0;
            loop {
                let result = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break 'session,
                    result = self.writer.write_text(message.clone()) => result,
                };
                match result {
                    Ok(()) => {
                        sent += 1;
                        break;
                    }
                    Err(e) if e.is_terminal() => {
                        debug!(error = %e, "Write loop stopping");
                        self.closer.fire(e.into());
                        break 'session;
                    }
                    Err(e) => {
                        failures += 1;
                        debug!(error = %e, consecutive = failures, "Transient write error, retrying");
                        if failures > self.max_transient {
                            self.closer.fire(CloseReason::TransientErrors {
                                direction: Direction::Write,
                                count: failures,
                            });
                            break 'session;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
        (self.writer, sent)
    }
}
