use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::host::Host;
use crate::key::Key;

/// Serialisable stub describing a node: where to reach it and its ring key.
///
/// This is the first (and, for bootstrap connections, only) object a node
/// writes on every inbound connection. Whoever holds a `NodeRef` can dial
/// the node and invoke the operations below on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub host: Host,
    pub key: Key,
}

/// A remote invocation on a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request<V> {
    // asking a node for its ring key; doubles as the liveness probe
    Key,
    // asking a node for its immediate successor
    Successor,
    // asking a node for its successor list
    Successors,
    // asking a node for its predecessor, if it has one
    Predecessor,
    // asking a node to resolve the successor responsible for a key
    FindSuccessor { key: Key },
    // telling a node about a peer that may be its predecessor
    Notify { peer: NodeRef },
    // retrieving a value from the ring
    Get { key: Key },
    // storing a value on the ring, yielding the previous binding
    Put { key: Key, value: V },
    // handing a node a key it is now responsible for
    Offer { key: Key, value: V },
}

/// The reply to a [`Request`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response<V> {
    Key { key: Key },
    Peer { peer: NodeRef },
    MaybePeer { peer: Option<NodeRef> },
    Peers { peers: VecDeque<NodeRef> },
    Value { value: Option<V> },
    Done,
}
