//! In-process endpoint pair, used to federate gateways living in the same
//! process and in tests.

use crate::endpoint::RemoteEndpoint;
use sensigate_core::{Error, PeerMessage, Result};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct MemoryEndpoint {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
}

/// Two connected endpoints: what one sends, the other receives.
pub fn pair() -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (MemoryEndpoint::new("memory:a", a_tx, b_rx), MemoryEndpoint::new("memory:b", b_tx, a_rx))
}

impl MemoryEndpoint {
    fn new(name: &str, tx: mpsc::UnboundedSender<PeerMessage>, rx: mpsc::UnboundedReceiver<PeerMessage>) -> Self {
        Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<PeerMessage>> {
        match self.tx.lock() {
            Ok(tx) => tx.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteEndpoint for MemoryEndpoint {
    async fn send(&self, message: PeerMessage) -> Result<()> {
        let tx = self.sender().ok_or_else(|| Error::unavailable("link closed"))?;
        tx.send(message).map_err(|_| Error::unavailable("link closed"))
    }

    async fn recv(&self) -> Option<Result<PeerMessage>> {
        self.rx.lock().await.recv().await.map(Ok)
    }

    /// Dropping our sender ends the peer's receive stream.
    async fn close(&self) {
        match self.tx.lock() {
            Ok(mut tx) => tx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_and_close_ends_the_stream() {
        let (a, b) = pair();
        a.send(PeerMessage::Bye).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), PeerMessage::Bye);

        a.close().await;
        assert!(b.recv().await.is_none());
        assert!(a.send(PeerMessage::Bye).await.is_err());
    }
}
