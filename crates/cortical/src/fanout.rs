//! Fan-out: duplicate one inbound stream into one bounded stream per
//! subscriber.
//!
//! Delivery is in subscriber order and awaits each send, so a full
//! subscriber buffer stalls ingestion for everyone. Nothing is dropped for a
//! live subscriber. A subscriber whose receiver is gone is skipped from then
//! on.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Start a fan-out stage over `input` with `subscribers` outputs of depth
/// `lag` each. The returned receivers are in subscriber order; all close once
/// `input` closes.
pub fn spawn<T>(
    mut input: mpsc::Receiver<T>,
    subscribers: usize,
    lag: usize,
) -> (Vec<mpsc::Receiver<T>>, JoinHandle<()>)
where
    T: Clone + Send + 'static,
{
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..subscribers).map(|_| mpsc::channel(lag.max(1))).unzip();
    let mut outputs: Vec<Option<mpsc::Sender<T>>> = senders.into_iter().map(Some).collect();

    let handle = tokio::spawn(async move {
        let mut delivered: u64 = 0;
        while let Some(item) = input.recv().await {
            delivered += 1;
            deliver(&mut outputs, item).await;
        }
        debug!(delivered, subscribers, "Fan-out input closed");
        // dropping `outputs` closes every subscriber channel
    });

    (receivers, handle)
}

async fn deliver<T: Clone>(outputs: &mut [Option<mpsc::Sender<T>>], item: T) {
    let Some(last) = outputs.iter().rposition(Option::is_some) else {
        return;
    };
    let mut item = Some(item);
    for (index, slot) in outputs.iter_mut().enumerate().take(last + 1) {
        let Some(tx) = slot.as_ref() else { continue };
        // the last live subscriber gets the original, everyone else a clone
        let message = if index == last {
            item.take()
        } else {
            item.clone()
        };
        let Some(message) = message else { break };
        if tx.send(message).await.is_err() {
            trace!(subscriber = index, "Fan-out subscriber gone, skipping");
            *slot = None;
        }
    }
}
