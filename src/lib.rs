//! A node implementation of the Chord distributed hash table.
//!
//! Nodes arrange themselves on a circular 32-bit identifier space and
//! collectively store key/value pairs: each node owns the keys on the arc
//! between its predecessor and itself. Lookups route through per-node
//! finger tables in a logarithmic number of hops, and a periodic
//! stabilization protocol heals the ring as nodes join and die.
//!
//! [`Node`] is the ring member; [`Peer`] is a handle on any member, local
//! or remote; the wire protocol lives in [`messages`] on top of the framed
//! object streams in [`net`].

pub mod config;
pub mod error;
pub mod host;
pub mod key;
pub mod messages;
pub mod net;
pub mod node;
pub mod peer;
pub mod repl;
pub mod schedule;

pub use config::Config;
pub use error::{Error, Result};
pub use host::Host;
pub use key::Key;
pub use node::Node;
pub use peer::{Peer, RemoteNode};
