//! BACnet/SC Transport Pump
//!
//! The engine loop is single-threaded, but the WebSocket transport wants an
//! async task of its own. This pump bridges the two with bounded channels:
//! the task shuttles frames between an [`ScTransport`] implementation and a
//! channel pair the engine drains without blocking. Backpressure comes from
//! the channel bounds; neither side can run ahead unchecked.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A connected frame transport (in practice, a WebSocket)
#[async_trait]
pub trait ScTransport: Send {
    /// Transmit one BVLC-SC message
    async fn send(&mut self, frame: Bytes) -> std::io::Result<()>;

    /// Receive the next BVLC-SC message; `None` when the peer closed
    async fn recv(&mut self) -> Option<Bytes>;
}

/// The engine side of a running pump
pub struct ScPump {
    outgoing: mpsc::Sender<Bytes>,
    incoming: mpsc::Receiver<Bytes>,
    task: JoinHandle<()>,
}

impl ScPump {
    /// Spawn the pump task over a transport with the given queue depth
    pub fn spawn<T: ScTransport + 'static>(mut transport: T, queue_depth: usize) -> Self {
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Bytes>(queue_depth.max(1));
        let (incoming_tx, incoming_rx) = mpsc::channel::<Bytes>(queue_depth.max(1));

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outgoing_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                if let Err(error) = transport.send(frame).await {
                                    debug!("transport send failed: {}", error);
                                    break;
                                }
                            }
                            // Engine dropped its sender: shut down.
                            None => break,
                        }
                    }
                    frame = transport.recv() => {
                        match frame {
                            Some(frame) => {
                                if incoming_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                debug!("transport closed by peer");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            task,
        }
    }

    /// Queue a frame for transmission without blocking; false when the
    /// queue is full or the pump stopped
    pub fn try_send(&self, frame: Bytes) -> bool {
        self.outgoing.try_send(frame).is_ok()
    }

    /// Fetch a received frame without blocking
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.incoming.try_recv().ok()
    }

    /// Await the next received frame
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.incoming.recv().await
    }

    /// Stop the pump task
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct LoopbackTransport {
        /// Frames the test injects as "received from the peer"
        inbox: Arc<Mutex<VecDeque<Bytes>>>,
        /// Frames the pump transmitted
        sent: Arc<Mutex<Vec<Bytes>>>,
    }

    #[async_trait]
    impl ScTransport for LoopbackTransport {
        async fn send(&mut self, frame: Bytes) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Bytes> {
            loop {
                if let Some(frame) = self.inbox.lock().unwrap().pop_front() {
                    return Some(frame);
                }
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_pump_shuttles_frames() {
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = LoopbackTransport {
            inbox: inbox.clone(),
            sent: sent.clone(),
        };

        let mut pump = ScPump::spawn(transport, 4);

        // Engine -> transport.
        assert!(pump.try_send(Bytes::from_static(&[0x0A, 0x00, 0x01, 0x00])));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        // Transport -> engine.
        inbox
            .lock()
            .unwrap()
            .push_back(Bytes::from_static(&[0x0B, 0x00, 0x01, 0x00]));
        let received = pump.recv().await.unwrap();
        assert_eq!(&received[..], [0x0B, 0x00, 0x01, 0x00]);

        pump.shutdown();
    }
}
