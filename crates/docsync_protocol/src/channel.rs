//! Bidirectional frame channels.
//!
//! A [`FrameChannel`] is one end of a message transport: a cloneable
//! [`FrameSender`] for outbound frames and a [`FrameReceiver`] for inbound
//! ones. Channels come either in in-process pairs ([`FrameChannel::pair`])
//! or wrapped around a byte stream such as a TCP socket
//! ([`FrameChannel::from_stream`]), in which case framing follows
//! [`crate::frame`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{read_frame, write_frame};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Cloneable handle for sending frames.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
}

impl FrameSender {
    /// Queues a frame for delivery.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ChannelClosed`] if the other end is gone or the
    /// transport was closed.
    pub fn send(&self, frame: Vec<u8>) -> ProtocolResult<()> {
        if *self.closed.borrow() {
            return Err(ProtocolError::ChannelClosed);
        }
        self.tx.send(frame).map_err(|_| ProtocolError::ChannelClosed)
    }

    /// Returns true if frames can no longer be delivered.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || *self.closed.borrow()
    }

    /// Shuts the transport down in both directions.
    ///
    /// Frames queued before the call are still delivered. Afterwards every
    /// sender fails and both receivers yield `None` once drained.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// Receiving half of a frame channel.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

impl FrameReceiver {
    /// Waits for the next frame; `None` once the transport has closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            _ = close_requested(&mut self.closed) => None,
        }
    }

    /// Returns a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

/// Resolves once the transport is closed or every close handle is gone.
async fn close_requested(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// One end of a frame transport.
#[derive(Debug)]
pub struct FrameChannel {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl FrameChannel {
    /// Creates two connected in-process ends.
    ///
    /// Closing either end closes both.
    pub fn pair() -> (FrameChannel, FrameChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed_tx);
        (
            FrameChannel {
                sender: FrameSender {
                    tx: a_tx,
                    closed: Arc::clone(&closed),
                },
                receiver: FrameReceiver {
                    rx: b_rx,
                    closed: closed_rx.clone(),
                },
            },
            FrameChannel {
                sender: FrameSender { tx: b_tx, closed },
                receiver: FrameReceiver {
                    rx: a_rx,
                    closed: closed_rx,
                },
            },
        )
    }

    /// Wraps a byte stream, spawning one reader and one writer task.
    ///
    /// The writer shuts the stream's write half down once every
    /// [`FrameSender`] has been dropped. The receiver yields `None` once
    /// the peer closes the stream or sends a malformed frame. A failed
    /// write or [`FrameSender::close`] also stops the reader, so the
    /// stream is dropped and the peer sees it end.
    pub fn from_stream<S>(stream: S, max_frame_len: usize) -> FrameChannel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed_tx);

        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            // Keeps the close signal alive while frames may still arrive.
            let _closed = reader_closed;
            loop {
                match read_frame(&mut read_half, max_frame_len).await {
                    Ok(Some(frame)) => {
                        if inbound_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stream closed by peer");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to read frame");
                        break;
                    }
                }
            }
        });

        let writer_closed = Arc::clone(&closed);
        let mut close_signal = closed_rx.clone();
        tokio::spawn(async move {
            let abandoned = loop {
                tokio::select! {
                    biased;
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(err) = write_frame(&mut write_half, &frame, max_frame_len).await {
                                warn!(error = %err, "failed to write frame");
                                break true;
                            }
                        }
                        None => break false,
                    },
                    _ = close_requested(&mut close_signal) => {
                        debug!("stream closed locally");
                        break true;
                    }
                }
            };
            if abandoned {
                writer_closed.send_replace(true);
                reader.abort();
            }
            let _ = write_half.shutdown().await;
        });

        FrameChannel {
            sender: FrameSender {
                tx: outbound_tx,
                closed,
            },
            receiver: FrameReceiver {
                rx: inbound_rx,
                closed: closed_rx,
            },
        }
    }

    /// Returns a new handle for sending frames.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Splits into the sending and receiving halves.
    pub fn into_parts(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pair_is_crossed() {
        let (left, right) = FrameChannel::pair();
        let (left_tx, mut left_rx) = left.into_parts();
        let (right_tx, mut right_rx) = right.into_parts();

        left_tx.send(b"ping".to_vec()).unwrap();
        assert_eq!(right_rx.recv().await, Some(b"ping".to_vec()));

        right_tx.send(b"pong".to_vec()).unwrap();
        assert_eq!(left_rx.recv().await, Some(b"pong".to_vec()));

        drop(right_rx);
        assert!(left_tx.send(Vec::new()).is_err());
        assert!(left_tx.is_closed());
    }

    #[tokio::test]
    async fn stream_channel_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_tx, mut a_rx) = FrameChannel::from_stream(a, 1024).into_parts();
        let (b_tx, mut b_rx) = FrameChannel::from_stream(b, 1024).into_parts();

        a_tx.send(b"one".to_vec()).unwrap();
        a_tx.send(b"two".to_vec()).unwrap();
        assert_eq!(b_rx.recv().await, Some(b"one".to_vec()));
        assert_eq!(b_rx.recv().await, Some(b"two".to_vec()));

        b_tx.send(b"back".to_vec()).unwrap();
        assert_eq!(a_rx.recv().await, Some(b"back".to_vec()));

        drop(a_tx);
        assert_eq!(b_rx.recv().await, None);
    }

    #[tokio::test]
    async fn closing_a_pair_ends_both_directions() {
        let (left, right) = FrameChannel::pair();
        let (left_tx, mut left_rx) = left.into_parts();
        let (right_tx, mut right_rx) = right.into_parts();

        left_tx.send(b"last".to_vec()).unwrap();
        left_tx.close();

        assert_eq!(right_rx.recv().await, Some(b"last".to_vec()));
        assert_eq!(right_rx.recv().await, None);
        assert_eq!(left_rx.recv().await, None);
        assert!(right_tx.is_closed());
        assert!(matches!(
            right_tx.send(Vec::new()),
            Err(ProtocolError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn oversized_write_tears_the_stream_down() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_tx, mut a_rx) = FrameChannel::from_stream(a, 64).into_parts();
        let (_b_tx, mut b_rx) = FrameChannel::from_stream(b, 64).into_parts();

        a_tx.send(vec![0u8; 100]).unwrap();

        let timeout = Duration::from_secs(5);
        assert_eq!(tokio::time::timeout(timeout, b_rx.recv()).await.unwrap(), None);
        assert_eq!(tokio::time::timeout(timeout, a_rx.recv()).await.unwrap(), None);
        assert!(a_tx.is_closed());
    }

    #[tokio::test]
    async fn close_flushes_then_ends_the_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_tx, mut a_rx) = FrameChannel::from_stream(a, 1024).into_parts();
        let (_b_tx, mut b_rx) = FrameChannel::from_stream(b, 1024).into_parts();

        a_tx.send(b"bye".to_vec()).unwrap();
        a_tx.close();

        let timeout = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(timeout, b_rx.recv()).await.unwrap(),
            Some(b"bye".to_vec())
        );
        assert_eq!(tokio::time::timeout(timeout, b_rx.recv()).await.unwrap(), None);
        assert_eq!(tokio::time::timeout(timeout, a_rx.recv()).await.unwrap(), None);
    }
}
