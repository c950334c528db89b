//! In-process duplex channel.
//!
//! Models the message port between a host and an isolated worker running in
//! the same process. Messages sent before the other side starts are buffered.

use std::sync::Mutex;

use replyport_frame::Message;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::lifecycle::{lock, Lifecycle};
use crate::traits::{ChannelAdapter, CloseReason, Inbound, InboundSender};

/// One half of a [`worker_channel`].
pub struct WorkerPort {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    lifecycle: Lifecycle,
}

/// Create a connected pair of in-process ports.
///
/// Whatever one side sends, the other side receives, in order. Closing or
/// dropping one half delivers [`CloseReason::Remote`] to the other.
pub fn worker_channel() -> (WorkerPort, WorkerPort) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (WorkerPort::new(a_tx, b_rx), WorkerPort::new(b_tx, a_rx))
}

impl WorkerPort {
    fn new(tx: mpsc::UnboundedSender<Message>, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            outbound: Mutex::new(Some(tx)),
            inbound: Mutex::new(Some(rx)),
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ChannelAdapter for WorkerPort {
    fn start(&self, inbound: InboundSender) -> Result<()> {
        if !self.lifecycle.begin_start()? {
            return Ok(());
        }
        let Some(mut rx) = lock(&self.inbound).take() else {
            return Err(TransportError::Closed);
        };

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if inbound.send(Inbound::Message(message)).is_err() {
                    return;
                }
            }
            tracing::debug!("worker channel: remote half closed");
            let _ = inbound.send(Inbound::Closed(CloseReason::Remote));
        });
        self.lifecycle.track(handle);
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        self.lifecycle.ensure_open()?;
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(message).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if !self.lifecycle.mark_closed() {
            return;
        }
        lock(&self.outbound).take();
        lock(&self.inbound).take();
        self.lifecycle.abort_all();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn transport_name(&self) -> &'static str {
        "worker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_in_order_after_start() {
        let (host, worker) = worker_channel();
        host.send(Message::event("a", vec![json!(1)])).unwrap();
        host.send(Message::event("b", vec![])).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.start(tx).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Inbound::Message(Message::event("a", vec![json!(1)])))
        );
        assert_eq!(
            rx.recv().await,
            Some(Inbound::Message(Message::event("b", vec![])))
        );
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (host, worker) = worker_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.start(tx.clone()).unwrap();
        worker.start(tx).unwrap();

        host.send(Message::event("once", vec![])).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Inbound::Message(Message::event("once", vec![])))
        );
        host.close();
        assert_eq!(rx.recv().await, Some(Inbound::Closed(CloseReason::Remote)));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (host, _worker) = worker_channel();
        host.close();
        host.close();
        assert!(host.is_closed());
        assert!(matches!(
            host.send(Message::event("x", vec![])),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_one_half_closes_the_other() {
        let (host, worker) = worker_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        host.start(tx).unwrap();
        drop(worker);
        assert_eq!(rx.recv().await, Some(Inbound::Closed(CloseReason::Remote)));
    }

    #[tokio::test]
    async fn start_after_close_fails() {
        let (host, _worker) = worker_channel();
        host.close();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(host.start(tx), Err(TransportError::Closed)));
    }
}
