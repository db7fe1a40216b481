//! [`Transport`] for axum's upgraded `WebSocket`.
//!
//! Ping frames are answered by the underlying protocol implementation; the
//! read half surfaces them only as [`Frame::Control`].

use std::future::poll_fn;
use std::io::ErrorKind;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::{CloseCode, Frame, FrameReader, FrameWriter, Transport, TransportError};
use crate::Message;

impl Transport for WebSocket {
    type Reader = SplitStream<Self>;
    type Writer = SplitSink<Self, WsMessage>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = StreamExt::split(self);
        (stream, sink)
    }
}

#[async_trait]
impl FrameReader for SplitStream<WebSocket> {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.next().await {
            // The peer vanished without a close handshake.
            None => Err(TransportError::Closed(CloseCode::ABNORMAL)),
            Some(Err(e)) => Err(classify(&e, TransportError::Closed(CloseCode::ABNORMAL))),
            Some(Ok(WsMessage::Text(text))) => {
                Ok(Frame::Text(Bytes::copy_from_slice(text.as_str().as_bytes())))
            }
            Some(Ok(WsMessage::Binary(data))) => Ok(Frame::Binary(data)),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => Ok(Frame::Control),
            Some(Ok(WsMessage::Close(frame))) => Err(TransportError::Closed(
                frame.map_or(CloseCode::NO_STATUS, |f| CloseCode(f.code)),
            )),
        }
    }
}

#[async_trait]
impl FrameWriter for SplitSink<WebSocket, WsMessage> {
    async fn write_text(&mut self, message: Message) -> Result<(), TransportError> {
        let frame = match Utf8Bytes::try_from(message.clone()) {
            Ok(text) => WsMessage::Text(text),
            Err(_) => {
                debug!(bytes = message.len(), "outbound message is not UTF-8, sending binary");
                WsMessage::Binary(message)
            }
        };
        // A queued frame may already be on the wire; only readiness failures
        // leave the message safe to resend.
        poll_fn(|cx| self.poll_ready_unpin(cx))
            .await
            .map_err(|e| classify(&e, TransportError::CloseSent))?;
        self.start_send_unpin(frame).map_err(|e| committed(&e))?;
        self.flush().await.map_err(|e| committed(&e))
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: code.0,
            reason: Utf8Bytes::from_static(""),
        };
        self.send(WsMessage::Close(Some(frame)))
            .await
            .map_err(|e| classify(&e, TransportError::CloseSent))?;
        SinkExt::close(self)
            .await
            .map_err(|e| classify(&e, TransportError::CloseSent))
    }
}

/// Map an axum WebSocket error onto the session's error classes.
///
/// Only I/O errors of a retryable kind are transient; everything else means
/// the connection is gone and `fallback` is returned.
fn classify(err: &axum::Error, fallback: TransportError) -> TransportError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                    TransportError::Io(io.to_string())
                }
                _ => fallback,
            };
        }
        source = current.source();
    }
    fallback
}

/// Failure after a frame was queued. Retrying could duplicate it, so every
/// error at this stage ends the session.
fn committed(err: &axum::Error) -> TransportError {
    debug!(error = %err, "send failed after frame was queued");
    TransportError::CloseSent
}
