//! In-process memory transport registry.
//!
//! A registry maps a memory address (`mem://name`) to a pairing queue. Both
//! `dial` and `accept` enqueue a one-shot slot and wait until a counterpart
//! on the same address hands them their half of a fresh duplex channel.
//! Matching is FIFO per address, and every slot is consumed at most once, so
//! a dial is never paired with two accepts.
//!
//! Entries are created lazily and live as long as the registry. The global
//! registry lives for the whole process. Slots left by cancelled waiters
//! are dropped the next time their side enqueues.

use crate::config::TransportConfig;
use crate::{HolonError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug, Default)]
struct PairingQueue {
    dials: VecDeque<oneshot::Sender<DuplexStream>>,
    accepts: VecDeque<oneshot::Sender<DuplexStream>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Dial,
    Accept,
}

/// Thread-safe registry pairing memory dials with memory accepts.
///
/// Cloning shares the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct MemRegistry {
    entries: Arc<Mutex<HashMap<String, PairingQueue>>>,
}

impl MemRegistry {
    /// Create an isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`listen`](super::listen) and
    /// [`dial`](super::dial).
    pub fn global() -> MemRegistry {
        static GLOBAL: OnceLock<MemRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MemRegistry::new).clone()
    }

    /// Wait for an accept on `address` and return the client half.
    pub async fn dial(&self, address: &str) -> Result<DuplexStream> {
        self.rendezvous(address, Side::Dial).await
    }

    /// Wait for a dial on `address` and return the server half.
    pub async fn accept(&self, address: &str) -> Result<DuplexStream> {
        self.rendezvous(address, Side::Accept).await
    }

    /// Number of dials and accepts currently waiting on `address`.
    pub fn pending(&self, address: &str) -> (usize, usize) {
        match self.entries.lock() {
            Ok(entries) => entries
                .get(address)
                .map(|q| (q.dials.len(), q.accepts.len()))
                .unwrap_or((0, 0)),
            Err(_) => (0, 0),
        }
    }

    async fn rendezvous(&self, address: &str, side: Side) -> Result<DuplexStream> {
        let slot = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| HolonError::Other("memory registry lock poisoned".to_string()))?;
            let queue = entries.entry(address.to_string()).or_default();
            let PairingQueue { dials, accepts } = queue;
            let (counterparts, own) = match side {
                Side::Dial => (accepts, dials),
                Side::Accept => (dials, accepts),
            };

            // Waiters that gave up leave a closed slot behind; skip them.
            while let Some(counterpart) = counterparts.pop_front() {
                let (mine, theirs) = tokio::io::duplex(TransportConfig::MEM_CHANNEL_CAPACITY);
                if counterpart.send(theirs).is_ok() {
                    trace!("memory {:?} paired on {}", side, address);
                    return Ok(mine);
                }
            }

            own.retain(|waiter| !waiter.is_closed());
            let (tx, rx) = oneshot::channel();
            own.push_back(tx);
            rx
        };

        slot.await.map_err(|_| HolonError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_then_accept_pairs() {
        let registry = MemRegistry::new();
        let dialer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial("mem://pair").await })
        };

        let mut server = registry.accept("mem://pair").await.unwrap();
        let mut client = dialer.await.unwrap().unwrap();

        client.write_all(b"mem").await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"mem");
    }

    #[tokio::test]
    async fn test_accept_then_dial_pairs() {
        let registry = MemRegistry::new();
        let acceptor = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.accept("mem://reverse").await })
        };

        // Let the accept enqueue first.
        while registry.pending("mem://reverse").1 == 0 {
            tokio::task::yield_now().await;
        }

        let mut client = registry.dial("mem://reverse").await.unwrap();
        let mut server = acceptor.await.unwrap().unwrap();

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_pairing_is_fifo() {
        let registry = MemRegistry::new();

        let mut dialers = Vec::new();
        for tag in [b'1', b'2'] {
            let dialer = registry.clone();
            dialers.push(tokio::spawn(async move {
                let mut stream = dialer.dial("mem://fifo").await.unwrap();
                stream.write_all(&[tag]).await.unwrap();
                stream
            }));
            while registry.pending("mem://fifo").0 < dialers.len() {
                tokio::task::yield_now().await;
            }
        }

        for expected in [b'1', b'2'] {
            let mut server = registry.accept("mem://fifo").await.unwrap();
            let mut buf = [0u8; 1];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf[0], expected);
        }
    }

    #[tokio::test]
    async fn test_addresses_are_isolated() {
        let registry = MemRegistry::new();
        let lonely = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial("mem://a").await })
        };

        let other = tokio::time::timeout(Duration::from_millis(50), registry.accept("mem://b")).await;
        assert!(other.is_err(), "accept on b must not pair with a dial on a");
        lonely.abort();
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let registry = MemRegistry::new();
        let abandoned = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial("mem://skip").await })
        };
        while registry.pending("mem://skip").0 == 0 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        let dialer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial("mem://skip").await })
        };
        let server = registry.accept("mem://skip").await;
        assert!(server.is_ok());
        assert!(dialer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_dials_do_not_accumulate() {
        let registry = MemRegistry::new();
        for _ in 0..20 {
            let dialed =
                tokio::time::timeout(Duration::from_millis(1), registry.dial("mem://gone")).await;
            assert!(dialed.is_err());
        }
        assert_eq!(registry.pending("mem://gone"), (1, 0));

        let dialer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial("mem://gone").await })
        };
        let server = registry.accept("mem://gone").await;
        assert!(server.is_ok());
        assert!(dialer.await.unwrap().is_ok());
    }
}
