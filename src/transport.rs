//! Bulk payload transport between the two parties of a pair.
//!
//! The crate does not implement its own transport. It assumes an
//! existing grouped-transport abstraction (MPI/NCCL/Gloo-like process
//! groups) behind the [`Connector`] seam, which turns one [`Address`]
//! into pairwise duplex channels plus the shared store each pair signals
//! through. An in-memory implementation backs tests and local
//! simulation.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    address::Address,
    common::Role,
    store::{InMemoryStore, KvStore},
};

/// The error type for raw transport faults.
pub type TransportError = anyhow::Error;

/// One duplex bytes channel between the two parties of a pair.
#[async_trait]
pub trait PairTransport: Send {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Everything a session needs for one remote pair.
pub struct PairConn {
    pub transport: Box<dyn PairTransport>,
    pub store: Arc<dyn KvStore>,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("rendezvous at `{0}` timed out")]
    Timeout(String),
    #[error("transport group construction failed: {0}")]
    Group(#[from] anyhow::Error),
}

/// Builds the grouped-transport world for one address.
///
/// For a world of two the result is a single pair. For larger worlds the
/// leader's connect fans the group out into one pair per follower, which
/// is why the result is a list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address, role: Role) -> Result<Vec<PairConn>, ConnectError>;
}

/// A [`PairTransport`] over in-process channels.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Creates both endpoints of one duplex channel.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl PairTransport for ChannelTransport {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(data)
            .map_err(|_| anyhow!("peer endpoint is gone"))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("peer endpoint is gone"))
    }
}

/// Creates pre-wired in-memory connectors for one address: one for the
/// leader and one per follower. Each leader/follower pair shares a store
/// and a duplex channel.
pub fn in_memory_world(followers: usize) -> (InMemoryConnector, Vec<InMemoryConnector>) {
    let mut leader_pairs = Vec::with_capacity(followers);
    let mut follower_connectors = Vec::with_capacity(followers);

    for _ in 0..followers {
        let (leader_end, follower_end) = ChannelTransport::pair();
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        leader_pairs.push(PairConn {
            transport: Box::new(leader_end) as Box<dyn PairTransport>,
            store: Arc::clone(&store),
        });
        follower_connectors.push(InMemoryConnector::with_pairs(vec![PairConn {
            transport: Box::new(follower_end) as Box<dyn PairTransport>,
            store,
        }]));
    }

    (InMemoryConnector::with_pairs(leader_pairs), follower_connectors)
}

/// A connector handing out pre-wired pairs. Connecting a second time
/// fails: the world has already been consumed.
pub struct InMemoryConnector {
    pairs: Mutex<Option<Vec<PairConn>>>,
}

impl InMemoryConnector {
    fn with_pairs(pairs: Vec<PairConn>) -> Self {
        Self {
            pairs: Mutex::new(Some(pairs)),
        }
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, address: &Address, _role: Role) -> Result<Vec<PairConn>, ConnectError> {
        self.pairs
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectError::Group(anyhow!("world `{}` already consumed", address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_is_duplex() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.send(vec![1, 2, 3]).await.unwrap();
        b.send(vec![4]).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(a.recv().await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_in_memory_world_shares_store_per_pair() {
        let (leader, followers) = in_memory_world(2);
        let addr = Address::new(crate::address::Backend::Null, "null").unwrap();

        let leader_pairs = leader.connect(&addr, Role::Leader).await.unwrap();
        assert_eq!(leader_pairs.len(), 2);

        let f0 = followers[0].connect(&addr, Role::Follower).await.unwrap();
        assert_eq!(f0.len(), 1);

        // second connect on the same connector is refused
        assert!(leader.connect(&addr, Role::Leader).await.is_err());
    }
}
