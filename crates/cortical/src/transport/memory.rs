//! In-process transport backed by unbounded channels.
//!
//! [`pair`] returns the session side ([`MemoryTransport`]) and a
//! [`MemoryPeer`] that plays the remote client: it injects frames, close
//! codes and errors, and observes everything the session writes.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{CloseCode, Frame, FrameReader, FrameWriter, Transport, TransportError};
use crate::Message;

/// Something the session wrote to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    Text(Message),
    Close(CloseCode),
}

type Incoming = Result<Frame, TransportError>;

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (write_fault_tx, write_fault_rx) = mpsc::unbounded_channel();

    let transport = MemoryTransport {
        reader: MemoryReader {
            incoming: incoming_rx,
        },
        writer: MemoryWriter {
            written: written_tx,
            faults: write_fault_rx,
        },
    };
    let peer = MemoryPeer {
        incoming: incoming_tx,
        written: Some(written_rx),
        write_faults: write_fault_tx,
    };
    (transport, peer)
}

/// Session side of an in-memory connection.
pub struct MemoryTransport {
    reader: MemoryReader,
    writer: MemoryWriter,
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

pub struct MemoryReader {
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.incoming
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed(CloseCode::ABNORMAL)))
    }
}

pub struct MemoryWriter {
    written: mpsc::UnboundedSender<Written>,
    faults: mpsc::UnboundedReceiver<TransportError>,
}

impl MemoryWriter {
    fn deliver(&mut self, item: Written) -> Result<(), TransportError> {
        if let Ok(fault) = self.faults.try_recv() {
            return Err(fault);
        }
        self.written
            .send(item)
            .map_err(|_| TransportError::CloseSent)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_text(&mut self, message: Message) -> Result<(), TransportError> {
        self.deliver(Written::Text(message))
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        self.deliver(Written::Close(code))
    }
}

/// Remote side of an in-memory connection.
pub struct MemoryPeer {
    incoming: mpsc::UnboundedSender<Incoming>,
    written: Option<mpsc::UnboundedReceiver<Written>>,
    write_faults: mpsc::UnboundedSender<TransportError>,
}

impl MemoryPeer {
    /// Send a text frame. Returns `false` once the session's reader is gone.
    pub fn send_text(&self, payload: impl Into<Bytes>) -> bool {
        self.incoming.send(Ok(Frame::Text(payload.into()))).is_ok()
    }

    pub fn send_binary(&self, payload: impl Into<Bytes>) -> bool {
        self.incoming.send(Ok(Frame::Binary(payload.into()))).is_ok()
    }

    pub fn send_ping(&self) -> bool {
        self.incoming.send(Ok(Frame::Control)).is_ok()
    }

    /// Initiate a close handshake with `code`.
    pub fn close(&self, code: CloseCode) -> bool {
        self.incoming
            .send(Err(TransportError::Closed(code)))
            .is_ok()
    }

    /// Make the session's next read fail with `error`.
    pub fn fail_read(&self, error: TransportError) -> bool {
        self.incoming.send(Err(error)).is_ok()
    }

    /// Make the session's next write fail with `error`.
    pub fn fail_write(&self, error: TransportError) -> bool {
        self.write_faults.send(error).is_ok()
    }

    /// Stop accepting writes; subsequent session writes fail with
    /// [`TransportError::CloseSent`].
    pub fn stop_reading(&mut self) {
        self.written = None;
    }

    /// Next item written by the session, or `None` once the writer half has
    /// been released.
    pub async fn recv(&mut self) -> Option<Written> {
        match self.written.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Next text message. `None` if the next item is a close or the writer
    /// is gone.
    pub async fn recv_text(&mut self) -> Option<Message> {
        match self.recv().await? {
            Written::Text(message) => Some(message),
            Written::Close(_) => None,
        }
    }

    /// Drain everything the session writes until its writer is released.
    pub async fn drain(&mut self) -> Vec<Written> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_from_peer_to_reader() {
        let (transport, peer) = pair();
        let (mut reader, _writer) = transport.split();

        assert!(peer.send_text("hello"));
        assert!(peer.send_binary(vec![1u8, 2, 3]));
        assert!(peer.send_ping());
        assert!(peer.close(CloseCode::GOING_AWAY));

        assert_eq!(
            reader.read_frame().await,
            Ok(Frame::Text(Bytes::from_static(b"hello")))
        );
        assert_eq!(
            reader.read_frame().await,
            Ok(Frame::Binary(Bytes::from_static(&[1, 2, 3])))
        );
        assert_eq!(reader.read_frame().await, Ok(Frame::Control));
        assert_eq!(
            reader.read_frame().await,
            Err(TransportError::Closed(CloseCode::GOING_AWAY))
        );
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_abnormal_close() {
        let (transport, peer) = pair();
        let (mut reader, _writer) = transport.split();
        drop(peer);
        assert_eq!(
            reader.read_frame().await,
            Err(TransportError::Closed(CloseCode::ABNORMAL))
        );
    }

    #[tokio::test]
    async fn writes_reach_peer_until_it_stops_reading() {
        let (transport, mut peer) = pair();
        let (_reader, mut writer) = transport.split();

        writer.write_text(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(peer.recv_text().await.unwrap(), Bytes::from_static(b"one"));

        peer.stop_reading();
        assert_eq!(
            writer.write_text(Bytes::from_static(b"two")).await,
            Err(TransportError::CloseSent)
        );
    }

    #[tokio::test]
    async fn injected_write_fault_applies_once() {
        let (transport, mut peer) = pair();
        let (_reader, mut writer) = transport.split();

        peer.fail_write(TransportError::Io("busy".into()));
        assert_eq!(
            writer.write_text(Bytes::from_static(b"x")).await,
            Err(TransportError::Io("busy".into()))
        );
        writer.write_text(Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(peer.recv_text().await.unwrap(), Bytes::from_static(b"y"));
    }

    #[tokio::test]
    async fn drain_ends_when_writer_released() {
        let (transport, mut peer) = pair();
        let (_reader, mut writer) = transport.split();

        writer.write_text(Bytes::from_static(b"a")).await.unwrap();
        writer.close(CloseCode::NORMAL).await.unwrap();
        drop(writer);

        assert_eq!(
            peer.drain().await,
            vec![
                Written::Text(Bytes::from_static(b"a")),
                Written::Close(CloseCode::NORMAL)
            ]
        );
    }
}
