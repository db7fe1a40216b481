//! Merge: combine many producer streams into one output.
//!
//! One forwarder per source copies into a shared bounded output until its
//! source closes or `done` fires. A coordinator waits for every forwarder and
//! then releases the output, which closes it. Order is FIFO per source only.

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Start a merge over `sources` with an output of depth `capacity`.
///
/// The returned handle is the coordinator; it completes once the output has
/// been closed.
pub fn spawn<T>(
    sources: Vec<mpsc::Receiver<T>>,
    done: CancellationToken,
    capacity: usize,
) -> (mpsc::Receiver<T>, JoinHandle<()>)
where
    T: Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));

    let forwarders: Vec<JoinHandle<u64>> = sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| tokio::spawn(forward(index, source, out_tx.clone(), done.clone())))
        .collect();

    let coordinator = tokio::spawn(async move {
        let count = forwarders.len();
        let mut forwarded: u64 = 0;
        for result in join_all(forwarders).await {
            match result {
                Ok(n) => forwarded += n,
                Err(e) => warn!(error = %e, "Merge forwarder failed"),
            }
        }
        debug!(sources = count, forwarded, "Merge finished");
        drop(out_tx);
    });

    (out_rx, coordinator)
}

async fn forward<T>(
    index: usize,
    mut source: mpsc::Receiver<T>,
    out: mpsc::Sender<T>,
    done: CancellationToken,
) -> u64 {
    let mut forwarded = 0;
    loop {
        let item = tokio::select! {
            biased;
            () = done.cancelled() => break,
            item = source.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let sent = tokio::select! {
            biased;
            () = done.cancelled() => break,
            sent = out.send(item) => sent,
        };
        if sent.is_err() {
            // output receiver gone, nobody left to forward to
            break;
        }
        forwarded += 1;
    }
    debug!(source = index, forwarded, "Merge forwarder stopped");
    forwarded
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn per_source_order_is_preserved() {
        let (a_tx, a_rx) = mpsc::channel(4);
        let (b_tx, b_rx) = mpsc::channel(4);
        let (mut out, coordinator) = spawn(vec![a_rx, b_rx], CancellationToken::new(), 1);

        let a = tokio::spawn(async move {
            for i in 0..20 {
                a_tx.send(("a", i)).await.unwrap();
            }
        });
        let b = tokio::spawn(async move {
            for i in 0..20 {
                b_tx.send(("b", i)).await.unwrap();
            }
        });

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        while let Some((source, i)) = out.recv().await {
            if source == "a" {
                seen_a.push(i);
            } else {
                seen_b.push(i);
            }
        }
        a.await.unwrap();
        b.await.unwrap();
        coordinator.await.unwrap();

        assert_eq!(seen_a, (0..20).collect::<Vec<_>>());
        assert_eq!(seen_b, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn no_sources_closes_output_immediately() {
        let (mut out, coordinator) = spawn::<u8>(Vec::new(), CancellationToken::new(), 1);
        assert_eq!(out.recv().await, None);
        coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn done_stops_forwarders_with_open_sources() {
        let (_tx, rx) = mpsc::channel::<u8>(1);
        let done = CancellationToken::new();
        let (mut out, coordinator) = spawn(vec![rx], done.clone(), 1);

        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), coordinator)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test]
    async fn done_unblocks_forwarder_waiting_on_full_output() {
        let (tx, rx) = mpsc::channel(4);
        let done = CancellationToken::new();
        let (_out, coordinator) = spawn(vec![rx], done.clone(), 1);

        // first fills the output, second parks the forwarder on send
        tx.send(1u8).await.unwrap();
        tx.send(2u8).await.unwrap();
        tokio::task::yield_now().await;

        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), coordinator)
            .await
            .unwrap()
            .unwrap();
    }
}
