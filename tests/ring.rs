//! Multi-node ring scenarios over real loopback connections.
//!
//! Nodes are spawned on ephemeral ports with pinned keys so the ring
//! layout is known, and stabilization rounds are driven explicitly instead
//! of waiting out the schedule.

use std::sync::Arc;

use chordkv::{Key, Node};

type TestNode = Arc<Node<String>>;

async fn spawn(key: u64) -> TestNode {
    Node::spawn_with_key("127.0.0.1:0".parse().unwrap(), Key::new(key))
        .await
        .unwrap()
}

async fn stabilize_rounds(nodes: &[&TestNode], rounds: usize) {
    for _ in 0..rounds {
        for node in nodes {
            node.stabilize().await.unwrap();
        }
    }
}

async fn successor_key(node: &TestNode) -> Key {
    node.successor().await.unwrap().key()
}

async fn predecessor_key(node: &TestNode) -> Option<Key> {
    node.predecessor().await.map(|peer| peer.key())
}

#[tokio::test]
async fn a_single_node_owns_the_whole_ring() {
    let a = spawn(10).await;

    assert_eq!(a.key(), Key::new(10));
    assert_eq!(successor_key(&a).await, Key::new(10));
    assert_eq!(predecessor_key(&a).await, None);

    for key in [0u64, 5, 10, 11, 3_000_000_000] {
        let found = a.find_successor(Key::new(key)).await.unwrap();
        assert_eq!(found.key(), Key::new(10));
    }

    assert_eq!(a.put(Key::new(5), "x".into()).await.unwrap(), None);
    assert_eq!(a.get(Key::new(5)).await.unwrap().as_deref(), Some("x"));
}

#[tokio::test]
async fn two_nodes_point_at_each_other() {
    let a = spawn(10).await;
    let b = spawn(20).await;
    b.join(a.host()).await.unwrap();

    stabilize_rounds(&[&b, &a], 2).await;

    assert_eq!(successor_key(&a).await, Key::new(20));
    assert_eq!(predecessor_key(&a).await, Some(Key::new(20)));
    assert_eq!(successor_key(&b).await, Key::new(10));
    assert_eq!(predecessor_key(&b).await, Some(Key::new(10)));

    // The successor list starts with the immediate successor.
    let successors = a.successors();
    assert_eq!(successors.front().unwrap().key(), Key::new(20));
}

#[tokio::test]
async fn every_node_routes_to_the_responsible_one() {
    let a = spawn(10).await;
    let b = spawn(20).await;
    let c = spawn(30).await;
    let d = spawn(40).await;

    b.join(a.host()).await.unwrap();
    stabilize_rounds(&[&b, &a], 3).await;
    c.join(a.host()).await.unwrap();
    stabilize_rounds(&[&c, &a, &b], 3).await;
    d.join(a.host()).await.unwrap();
    stabilize_rounds(&[&d, &a, &b, &c], 3).await;

    for node in [&a, &b, &c, &d] {
        let found = node.find_successor(Key::new(25)).await.unwrap();
        assert_eq!(found.key(), Key::new(30), "from node {}", node.key());
    }

    // A value is visible from every node, wherever it landed.
    b.put(Key::new(25), "route".into()).await.unwrap();
    for node in [&a, &b, &c, &d] {
        let value = node.get(Key::new(25)).await.unwrap();
        assert_eq!(value.as_deref(), Some("route"), "from node {}", node.key());
    }
}

#[tokio::test]
async fn keys_move_to_a_newly_responsible_node() {
    let a = spawn(10).await;
    let b = spawn(30).await;
    b.join(a.host()).await.unwrap();
    stabilize_rounds(&[&b, &a], 3).await;

    // Key 15 falls on the arc (10, 30], so it lands on the node at 30.
    a.put(Key::new(15), "moved".into()).await.unwrap();
    assert!(b.stored_keys().contains(&Key::new(15)));

    let c = spawn(20).await;
    c.join(a.host()).await.unwrap();
    stabilize_rounds(&[&c, &a, &b], 3).await;

    // The node at 20 is responsible for 15 now; exactly one copy exists.
    assert_eq!(c.get(Key::new(15)).await.unwrap().as_deref(), Some("moved"));
    assert!(c.stored_keys().contains(&Key::new(15)));
    assert!(!b.stored_keys().contains(&Key::new(15)));
}

#[tokio::test]
async fn the_ring_heals_around_a_dead_node() {
    let a = spawn(10).await;
    let b = spawn(20).await;
    let c = spawn(30).await;

    b.join(a.host()).await.unwrap();
    stabilize_rounds(&[&b, &a], 3).await;
    c.join(a.host()).await.unwrap();
    stabilize_rounds(&[&c, &a, &b], 3).await;

    // Key 15 lives on the node at 20, which is about to die with it.
    a.put(Key::new(15), "doomed".into()).await.unwrap();
    assert!(b.stored_keys().contains(&Key::new(15)));

    b.shutdown();
    stabilize_rounds(&[&a, &c], 2).await;

    assert_eq!(successor_key(&a).await, Key::new(30));
    assert_eq!(predecessor_key(&c).await, Some(Key::new(10)));

    // Nothing replicated the value; it is gone, not duplicated.
    assert_eq!(a.get(Key::new(15)).await.unwrap(), None);
    assert!(!a.stored_keys().contains(&Key::new(15)));
    assert!(!c.stored_keys().contains(&Key::new(15)));
}

#[tokio::test]
async fn lookups_wrap_around_the_top_of_the_ring() {
    let top = (1u64 << 32) - 6;
    let a = spawn(5).await;
    let b = spawn(top).await;
    b.join(a.host()).await.unwrap();
    stabilize_rounds(&[&b, &a], 3).await;

    for node in [&a, &b] {
        let found = node.find_successor(Key::new(top + 2)).await.unwrap();
        assert_eq!(found.key(), Key::new(5), "from node {}", node.key());

        let found = node.find_successor(Key::new(0)).await.unwrap();
        assert_eq!(found.key(), Key::new(5), "from node {}", node.key());

        let found = node.find_successor(Key::new(top)).await.unwrap();
        assert_eq!(found.key(), Key::new(top), "from node {}", node.key());
    }

    // A value stored past the wrap point is reachable from both sides.
    b.put(Key::new(top + 2), "wrapped".into()).await.unwrap();
    assert_eq!(
        a.get(Key::new(top + 2)).await.unwrap().as_deref(),
        Some("wrapped")
    );
    assert!(a.stored_keys().contains(&Key::new(top + 2)));
}
