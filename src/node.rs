use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::host::Host;
use crate::key::{Key, KEY_BITS};
use crate::messages::{NodeRef, Request, Response};
use crate::net::{Channel, Connection};
use crate::peer::{is_alive, Peer, RemoteNode};
use crate::schedule::{schedule, Schedule};

/// How often the stabilization round runs.
pub const STABILIZATION_INTERVAL: Duration = Duration::from_millis(4000);

/// Length of the successor list, the number of ring neighbours kept as
/// fallback for a dead immediate successor.
pub const REPLICATION_FACTOR: usize = 2;

/// One member of the Chord ring.
///
/// A node owns a slice of the key space: every key on the arc between its
/// predecessor (exclusive) and itself (inclusive). Lookups it cannot answer
/// are routed through the finger table; a periodic stabilization round
/// repairs the successor/predecessor pointers, the fingers, and the key
/// placement as nodes join and die.
///
/// All mutable state sits behind leaf-level locks that are only ever held
/// for in-memory reads and writes, never across a remote call.
pub struct Node<V> {
    host: Host,
    key: Key,
    /// Back-reference for minting local peer handles; the listener and the
    /// stabilization schedule keep the node alive, so upgrading never fails
    /// while the node is in use.
    self_ref: Weak<Node<V>>,
    /// Logarithmic shortcuts around the ring; entry 0 is the immediate
    /// successor.
    fingers: Mutex<Vec<Peer<V>>>,
    /// The next ring neighbours, first one closest. Replaced wholesale, so
    /// readers see either the old list or the new one.
    successors: Mutex<VecDeque<Peer<V>>>,
    predecessor: Mutex<Option<Peer<V>>>,
    store: Mutex<HashMap<Key, V>>,
    channel: Mutex<Option<Channel>>,
    schedule: Mutex<Option<Schedule>>,
}

impl<V> Node<V> {
    pub fn key(&self) -> Key {
        self.key
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The keys currently held in the local store.
    pub fn stored_keys(&self) -> Vec<Key> {
        self.store.lock().unwrap().keys().copied().collect()
    }

    /// A snapshot of the successor list.
    pub fn successors(&self) -> VecDeque<Peer<V>> {
        self.successors.lock().unwrap().clone()
    }

    fn set_successor(&self, peer: Peer<V>) {
        self.fingers.lock().unwrap()[0] = peer;
    }

    fn self_peer(&self) -> Peer<V> {
        Peer::Local(self.self_ref.upgrade().expect("node was dropped"))
    }

    /// Stop serving and stop stabilizing. The node becomes unreachable to
    /// its peers, as if the process had died; nothing is handed off.
    pub fn shutdown(&self) {
        info!("node {} shutting down", self.key);
        if let Some(mut channel) = self.channel.lock().unwrap().take() {
            channel.close();
        }
        if let Some(schedule) = self.schedule.lock().unwrap().take() {
            schedule.cancel();
        }
    }
}

impl<V> Node<V>
where
    V: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static,
{
    /// Start a node bound to `host`, with its key derived from the host.
    ///
    /// The node exports itself on the host's port and begins stabilizing
    /// immediately; until [`join`](Node::join) is called it forms a ring of
    /// one.
    pub async fn spawn(host: Host) -> Result<Arc<Node<V>>> {
        let channel = Channel::bind(&host).await?;
        let key = Key::of_host(channel.local());
        Ok(Self::start(channel, key))
    }

    /// Start a node with an explicitly chosen key instead of one derived
    /// from the host. Deterministic ring layouts are built with this.
    pub async fn spawn_with_key(host: Host, key: Key) -> Result<Arc<Node<V>>> {
        let channel = Channel::bind(&host).await?;
        Ok(Self::start(channel, key))
    }

    fn start(mut channel: Channel, key: Key) -> Arc<Node<V>> {
        let host = channel.local().clone();
        let node = Arc::new_cyclic(|weak| Node {
            host,
            key,
            self_ref: weak.clone(),
            fingers: Mutex::new(Vec::new()),
            successors: Mutex::new(VecDeque::new()),
            predecessor: Mutex::new(None),
            store: Mutex::new(HashMap::new()),
            channel: Mutex::new(None),
            schedule: Mutex::new(None),
        });

        // Until the node learns about peers it is its own successor, and
        // every finger points at it.
        *node.fingers.lock().unwrap() = (0..KEY_BITS).map(|_| Peer::Local(node.clone())).collect();

        let served = node.clone();
        channel.serve(move |conn| {
            let node = served.clone();
            async move { node.handle_connection(conn).await }
        });
        *node.channel.lock().unwrap() = Some(channel);

        let stabilized = node.clone();
        let stabilization = schedule(STABILIZATION_INTERVAL, move || {
            let node = stabilized.clone();
            async move { node.stabilize().await }
        });
        *node.schedule.lock().unwrap() = Some(stabilization);

        info!("node {} listening on {}", node.key, node.host);
        node
    }

    /// Join the ring a known host belongs to, by adopting the peer
    /// responsible for this node's key as successor. The predecessor stays
    /// unset until an upstream node notifies us.
    pub async fn join(&self, known: &Host) -> Result<()> {
        let known = RemoteNode::connect(known).await?;
        let successor = known.find_successor::<V>(self.key).await?;
        info!(
            "node {} joining via {}, successor is {}",
            self.key,
            known.key(),
            successor.key()
        );
        self.set_successor(Peer::Remote(successor));
        Ok(())
    }

    /// The immediate successor, after checking it is still reachable.
    ///
    /// A dead successor is replaced by the first live entry of the
    /// successor list, or by this node itself when the whole list is gone.
    pub async fn successor(&self) -> Result<Peer<V>> {
        let current = self.fingers.lock().unwrap()[0].clone();
        if !is_alive(&current).await {
            warn!(
                "node {}: successor {} is unreachable, promoting a backup",
                self.key,
                current.key()
            );
            // The first backup is the dead successor itself; skip it.
            let backups: Vec<Peer<V>> = self
                .successors
                .lock()
                .unwrap()
                .iter()
                .skip(1)
                .cloned()
                .collect();

            let mut replacement = self.self_peer();
            for backup in backups {
                if is_alive(&backup).await {
                    replacement = backup;
                    break;
                }
            }
            self.set_successor(replacement.clone());
            self.reconcile_successors(&replacement).await?;
        }

        Ok(self.fingers.lock().unwrap()[0].clone())
    }

    /// The predecessor, cleared first if it stopped answering.
    pub async fn predecessor(&self) -> Option<Peer<V>> {
        let current = self.predecessor.lock().unwrap().clone()?;
        if is_alive(&current).await {
            return Some(current);
        }

        let mut slot = self.predecessor.lock().unwrap();
        // Only clear if nobody replaced it while we were probing.
        if slot.as_ref().map(Peer::key) == Some(current.key()) {
            *slot = None;
        }
        None
    }

    /// Resolve the peer responsible for `key`.
    pub async fn find_successor(&self, key: Key) -> Result<Peer<V>> {
        let successor = self.successor().await?;
        if key.is_between(self.key, successor.key()) {
            return Ok(successor);
        }

        match self.closest_preceding_finger(key).await {
            // No finger can get closer than this node; the search cannot
            // progress past it.
            Peer::Local(_) => Ok(self.self_peer()),
            Peer::Remote(closest) => Ok(Peer::Remote(closest.find_successor::<V>(key).await?)),
        }
    }

    /// The live finger whose key falls nearest before `key`, or this node
    /// when none does.
    async fn closest_preceding_finger(&self, key: Key) -> Peer<V> {
        let fingers = self.fingers.lock().unwrap().clone();

        let mut candidate = self.self_peer();
        for finger in fingers {
            if !is_alive(&finger).await {
                continue;
            }
            if finger.key().is_between(self.key, key) {
                candidate = finger;
            }
        }
        candidate
    }

    /// A peer claims it might be our predecessor; adopt it if it fits the
    /// arc between the current predecessor and this node.
    pub async fn notify(&self, peer: Peer<V>) {
        // A node notifying itself carries no information; happens in a ring
        // of one.
        if peer.key() == self.key {
            return;
        }

        let Some(current) = self.predecessor().await else {
            debug!("node {}: adopting predecessor {}", self.key, peer.key());
            *self.predecessor.lock().unwrap() = Some(peer);
            return;
        };

        if peer.key().is_between(current.key(), self.key) {
            debug!(
                "node {}: replacing predecessor {} with {}",
                self.key,
                current.key(),
                peer.key()
            );
            *self.predecessor.lock().unwrap() = Some(peer);
        }
    }

    /// Retrieve the value bound to `key`, wherever it lives on the ring.
    pub async fn get(&self, key: Key) -> Result<Option<V>> {
        match self.find_successor(key).await? {
            responsible if responsible.key() == self.key => Ok(self.lookup(&key)),
            Peer::Remote(responsible) => responsible.get::<V>(key).await,
            Peer::Local(responsible) => Ok(responsible.lookup(&key)),
        }
    }

    /// Bind `value` to `key` on the responsible node, returning the
    /// previous binding if any.
    pub async fn put(&self, key: Key, value: V) -> Result<Option<V>> {
        match self.find_successor(key).await? {
            responsible if responsible.key() == self.key => Ok(self.insert(key, value)),
            Peer::Remote(responsible) => responsible.put::<V>(key, value).await,
            Peer::Local(responsible) => Ok(responsible.insert(key, value)),
        }
    }

    /// Accept a key another node is handing off. An existing binding wins,
    /// which keeps the handoff idempotent.
    pub fn offer(&self, key: Key, value: V) {
        self.store.lock().unwrap().entry(key).or_insert(value);
    }

    fn lookup(&self, key: &Key) -> Option<V> {
        self.store.lock().unwrap().get(key).cloned()
    }

    fn insert(&self, key: Key, value: V) -> Option<V> {
        self.store.lock().unwrap().insert(key, value)
    }

    /// One stabilization round: verify the successor, announce ourselves to
    /// it, refresh the fingers, hand off keys we no longer own, and refill
    /// the successor list.
    ///
    /// Runs on the schedule started at spawn; an unrecoverable error here
    /// cancels that schedule and the node goes stale but keeps serving.
    pub async fn stabilize(&self) -> Result<()> {
        let successor = self.successor().await?;

        // Our successor's predecessor may have slotted in between us; if
        // so it is our successor now.
        if let Some(candidate) = successor.predecessor().await? {
            if candidate.key().is_between(self.key, successor.key()) {
                self.set_successor(candidate);
            }
        }

        self.successor()
            .await?
            .notify(self.self_peer())
            .await?;

        self.fix_fingers().await?;
        self.handoff().await?;

        let successor = self.successor().await?;
        self.reconcile_successors(&successor).await?;
        Ok(())
    }

    /// Point every finger at the successor of its arc start. Finger 0 is
    /// the immediate successor and is maintained by `stabilize` itself.
    async fn fix_fingers(&self) -> Result<()> {
        for bits in 1..KEY_BITS {
            let finger = self.find_successor(self.key.shift(bits)).await?;
            self.fingers.lock().unwrap()[bits as usize] = finger;
        }
        Ok(())
    }

    /// Offer every stored key we are no longer responsible for to the node
    /// that now is.
    async fn handoff(&self) -> Result<()> {
        let keys = self.stored_keys();
        for key in keys {
            let responsible = self.find_successor(key).await?;
            if responsible.key() == self.key {
                continue;
            }

            let Some(value) = self.store.lock().unwrap().remove(&key) else {
                continue;
            };
            debug!(
                "node {}: handing off key {} to {}",
                self.key,
                key,
                responsible.key()
            );
            match responsible {
                Peer::Remote(remote) => remote.offer::<V>(key, value).await?,
                Peer::Local(local) => local.offer(key, value),
            }
        }
        Ok(())
    }

    /// Rebuild the successor list from the successor's own: it goes first,
    /// followed by the head of its list, capped at the replication factor.
    async fn reconcile_successors(&self, successor: &Peer<V>) -> Result<()> {
        // A ring of one keeps an empty list.
        if successor.key() == self.key {
            return Ok(());
        }

        let mut successors = successor.successors().await?;
        successors.push_front(successor.clone());
        successors.truncate(REPLICATION_FACTOR);
        *self.successors.lock().unwrap() = successors;
        Ok(())
    }

    /// Serve one inbound connection: greet with our stub, then answer at
    /// most one request. Bootstrap clients hang up after the greeting.
    async fn handle_connection(self: Arc<Self>, mut conn: Connection) -> Result<()> {
        conn.write(&self.to_ref()).await?;

        let Some(request) = conn.read_opt::<Request<V>>().await? else {
            return Ok(());
        };
        let response = self.dispatch(request).await?;
        conn.write(&response).await
    }

    fn to_ref(&self) -> NodeRef {
        NodeRef {
            host: self.host.clone(),
            key: self.key,
        }
    }

    async fn dispatch(&self, request: Request<V>) -> Result<Response<V>> {
        Ok(match request {
            Request::Key => Response::Key { key: self.key },
            Request::Successor => Response::Peer {
                peer: self.successor().await?.to_ref(),
            },
            Request::Successors => Response::Peers {
                peers: self.successors().iter().map(Peer::to_ref).collect(),
            },
            Request::Predecessor => Response::MaybePeer {
                peer: self.predecessor().await.map(|peer| peer.to_ref()),
            },
            Request::FindSuccessor { key } => Response::Peer {
                peer: self.find_successor(key).await?.to_ref(),
            },
            Request::Notify { peer } => {
                self.notify(Peer::Remote(RemoteNode::new(peer))).await;
                Response::Done
            }
            Request::Get { key } => Response::Value {
                value: self.get(key).await?,
            },
            Request::Put { key, value } => Response::Value {
                value: self.put(key, value).await?,
            },
            Request::Offer { key, value } => {
                self.offer(key, value);
                Response::Done
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node(key: u64) -> Arc<Node<String>> {
        Node::spawn_with_key("127.0.0.1:0".parse().unwrap(), Key::new(key))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lone_node_is_its_own_successor() {
        let node = node(10).await;
        assert_eq!(node.successor().await.unwrap().key(), Key::new(10));
        assert!(node.predecessor().await.is_none());
    }

    #[tokio::test]
    async fn lone_node_answers_every_lookup() {
        let node = node(10).await;
        for key in [0u64, 9, 10, 11, 4_000_000_000] {
            let found = node.find_successor(Key::new(key)).await.unwrap();
            assert_eq!(found.key(), Key::new(10));
        }
    }

    #[tokio::test]
    async fn put_returns_the_previous_binding() {
        let node = node(10).await;
        assert_eq!(node.put(Key::new(5), "x".into()).await.unwrap(), None);
        let previous = node.put(Key::new(5), "y".into()).await.unwrap();
        assert_eq!(previous.as_deref(), Some("x"));
        assert_eq!(node.get(Key::new(5)).await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn offer_never_overwrites() {
        let node = node(10).await;
        node.offer(Key::new(7), "kept".into());
        node.offer(Key::new(7), "ignored".into());
        assert_eq!(
            node.get(Key::new(7)).await.unwrap().as_deref(),
            Some("kept")
        );
    }

    #[tokio::test]
    async fn stabilizing_alone_changes_nothing() {
        let node = node(10).await;
        node.stabilize().await.unwrap();
        assert_eq!(node.successor().await.unwrap().key(), Key::new(10));
        assert!(node.predecessor().await.is_none());
        assert!(node.successors().is_empty());
    }
}
