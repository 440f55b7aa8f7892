use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::key::Key;
use crate::messages::{NodeRef, Request, Response};
use crate::net::Connection;
use crate::node::Node;

/// Deadline for the liveness probe. A peer that cannot answer a key request
/// within this window is treated as dead.
pub const PEER_TIMEOUT: Duration = Duration::from_millis(500);

/// A handle on some node of the ring.
///
/// `Local` is the node this process runs and short-circuits the network;
/// `Remote` dispatches every operation over the transport. A remote handle
/// may denote a peer that has since died, so every operation on it can
/// fail; callers either propagate the failure or route it through
/// [`is_alive`] and fall back structurally.
pub enum Peer<V> {
    Local(Arc<Node<V>>),
    Remote(RemoteNode),
}

impl<V> Clone for Peer<V> {
    fn clone(&self) -> Peer<V> {
        match self {
            Peer::Local(node) => Peer::Local(node.clone()),
            Peer::Remote(remote) => Peer::Remote(remote.clone()),
        }
    }
}

impl<V> fmt::Debug for Peer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Local(node) => write!(f, "Local({} @ {})", node.key(), node.host()),
            Peer::Remote(remote) => write!(f, "Remote({} @ {})", remote.key(), remote.host()),
        }
    }
}

impl<V> Peer<V> {
    pub fn key(&self) -> Key {
        match self {
            Peer::Local(node) => node.key(),
            Peer::Remote(remote) => remote.key(),
        }
    }

    /// The serialisable stub for this handle, as sent over the wire.
    pub fn to_ref(&self) -> NodeRef {
        match self {
            Peer::Local(node) => NodeRef {
                host: node.host().clone(),
                key: node.key(),
            },
            Peer::Remote(remote) => remote.stub().clone(),
        }
    }
}

impl<V> Peer<V>
where
    V: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static,
{
    pub async fn find_successor(&self, key: Key) -> Result<Peer<V>> {
        match self {
            Peer::Local(node) => node.find_successor(key).await,
            Peer::Remote(remote) => Ok(Peer::Remote(remote.find_successor::<V>(key).await?)),
        }
    }

    pub async fn successors(&self) -> Result<VecDeque<Peer<V>>> {
        match self {
            Peer::Local(node) => Ok(node.successors()),
            Peer::Remote(remote) => Ok(remote
                .successors::<V>()
                .await?
                .into_iter()
                .map(|stub| Peer::Remote(RemoteNode::new(stub)))
                .collect()),
        }
    }

    pub async fn predecessor(&self) -> Result<Option<Peer<V>>> {
        match self {
            Peer::Local(node) => Ok(node.predecessor().await),
            Peer::Remote(remote) => Ok(remote
                .predecessor::<V>()
                .await?
                .map(Peer::Remote)),
        }
    }

    pub async fn notify(&self, peer: Peer<V>) -> Result<()> {
        match self {
            Peer::Local(node) => {
                node.notify(peer).await;
                Ok(())
            }
            Peer::Remote(remote) => remote.notify::<V>(peer.to_ref()).await,
        }
    }
}

/// Check whether a peer is reachable, within [`PEER_TIMEOUT`].
///
/// Any transport error or timeout means dead; the next stabilization round
/// is responsible for recovery, never the probing call site.
pub async fn is_alive<V>(peer: &Peer<V>) -> bool
where
    V: Serialize + for<'de> Deserialize<'de>,
{
    match peer {
        Peer::Local(_) => true,
        Peer::Remote(remote) => probe::<V>(remote).await.is_ok(),
    }
}

/// The bounded-time reachability check behind [`is_alive`]: a key request
/// raced against the deadline.
pub async fn probe<V>(remote: &RemoteNode) -> Result<Key>
where
    V: Serialize + for<'de> Deserialize<'de>,
{
    match timeout(PEER_TIMEOUT, remote.ping::<V>()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::Timeout),
    }
}

/// Client side of the remote invocation machinery.
///
/// Holds the stub a node handed out and dials a fresh connection per
/// invocation: read the unsolicited stub greeting, write one request, read
/// one response, hang up.
#[derive(Clone, Debug)]
pub struct RemoteNode {
    stub: NodeRef,
}

impl RemoteNode {
    pub fn new(stub: NodeRef) -> RemoteNode {
        RemoteNode { stub }
    }

    /// Bootstrap against a known host: open a connection, take the stub the
    /// node greets with, and hang up.
    pub async fn connect(host: &Host) -> Result<RemoteNode> {
        let mut conn = Connection::connect(host).await?;
        let stub: NodeRef = conn.read().await?;
        Ok(RemoteNode::new(stub))
    }

    /// The peer's ring key, as recorded in its stub. The key is derived
    /// from the host, so no round-trip is needed; reachability checks go
    /// through [`probe`] instead.
    pub fn key(&self) -> Key {
        self.stub.key
    }

    pub fn host(&self) -> &Host {
        &self.stub.host
    }

    pub fn stub(&self) -> &NodeRef {
        &self.stub
    }

    async fn call<V>(&self, request: Request<V>) -> Result<Response<V>>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        let mut conn = Connection::connect(&self.stub.host).await?;
        let _greeting: NodeRef = conn.read().await?;
        conn.write(&request).await?;
        conn.read().await
    }

    /// Ask the peer for its key over the wire. This is the round-trip the
    /// liveness probe rides on.
    pub async fn ping<V>(&self) -> Result<Key>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Key).await? {
            Response::Key { key } => Ok(key),
            _ => Err(Error::Protocol("unexpected response to key request")),
        }
    }

    pub async fn successor<V>(&self) -> Result<RemoteNode>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Successor).await? {
            Response::Peer { peer } => Ok(RemoteNode::new(peer)),
            _ => Err(Error::Protocol("unexpected response to successor request")),
        }
    }

    pub async fn successors<V>(&self) -> Result<VecDeque<NodeRef>>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Successors).await? {
            Response::Peers { peers } => Ok(peers),
            _ => Err(Error::Protocol("unexpected response to successors request")),
        }
    }

    pub async fn predecessor<V>(&self) -> Result<Option<RemoteNode>>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Predecessor).await? {
            Response::MaybePeer { peer } => Ok(peer.map(RemoteNode::new)),
            _ => Err(Error::Protocol("unexpected response to predecessor request")),
        }
    }

    pub async fn find_successor<V>(&self, key: Key) -> Result<RemoteNode>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::FindSuccessor { key }).await? {
            Response::Peer { peer } => Ok(RemoteNode::new(peer)),
            _ => Err(Error::Protocol("unexpected response to find-successor request")),
        }
    }

    pub async fn notify<V>(&self, peer: NodeRef) -> Result<()>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Notify { peer }).await? {
            Response::Done => Ok(()),
            _ => Err(Error::Protocol("unexpected response to notify request")),
        }
    }

    pub async fn get<V>(&self, key: Key) -> Result<Option<V>>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Get { key }).await? {
            Response::Value { value } => Ok(value),
            _ => Err(Error::Protocol("unexpected response to get request")),
        }
    }

    pub async fn put<V>(&self, key: Key, value: V) -> Result<Option<V>>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Put { key, value }).await? {
            Response::Value { value } => Ok(value),
            _ => Err(Error::Protocol("unexpected response to put request")),
        }
    }

    pub async fn offer<V>(&self, key: Key, value: V) -> Result<()>
    where
        V: Serialize + for<'de> Deserialize<'de>,
    {
        match self.call::<V>(Request::Offer { key, value }).await? {
            Response::Done => Ok(()),
            _ => Err(Error::Protocol("unexpected response to offer request")),
        }
    }
}
