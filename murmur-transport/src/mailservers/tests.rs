// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use murmur_core::test_utils::mailserver_from_seed;
use murmur_core::{
    EnvelopeEvent, EnvelopeEventType, Hash, MailServerResponse, Mailserver, PeerEvent, PeerId,
};
use murmur_store::{MailserverRecord, MailserversStore, MemoryStore};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionManagerConfig;
use crate::mailservers::connection_manager::InternalState;
use crate::mailservers::{
    ConnectionManager, LastUsedConnectionMonitor, PeerStore, ensure_used_records_added_first,
};
use crate::network::Network;
use crate::test_utils::MemoryNetwork;

fn nodes(seeds: impl IntoIterator<Item = u8>) -> Vec<Mailserver> {
    seeds.into_iter().map(mailserver_from_seed).collect()
}

fn to_map(nodes: &[Mailserver]) -> HashMap<PeerId, Mailserver> {
    nodes.iter().map(|node| (node.id, node.clone())).collect()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

fn config(target: usize, max_failures: usize) -> ConnectionManagerConfig {
    ConnectionManagerConfig {
        connections_target: target,
        max_failures,
        timeout_wait_added: Duration::ZERO,
    }
}

#[tokio::test]
async fn replace_nodes() {
    let network = Arc::new(MemoryNetwork::new());
    let mut state = InternalState::new(network.clone(), 2, Duration::ZERO);

    state.replace_nodes(HashMap::new());
    assert!(network.connected_peers().is_empty());

    let old = nodes([1, 2, 3]);
    state.replace_nodes(to_map(&old));
    assert_eq!(network.connected_peers().len(), 3);

    // None of the old nodes survives a full replacement.
    let new = nodes([4, 5, 6]);
    state.replace_nodes(to_map(&new));
    let mut expected: Vec<PeerId> = new.iter().map(|node| node.id).collect();
    expected.sort();
    assert_eq!(network.connected_peers(), expected);
}

#[tokio::test]
async fn partial_replace_below_target() {
    let network = Arc::new(MemoryNetwork::new());
    let mut state = InternalState::new(network.clone(), 2, Duration::ZERO);

    state.replace_nodes(to_map(&nodes([1])));
    state.replace_nodes(to_map(&nodes([1, 2, 3])));
    assert_eq!(network.connected_peers().len(), 3);
}

#[tokio::test]
async fn partial_replace_above_target() {
    let network = Arc::new(MemoryNetwork::new());
    let mut state = InternalState::new(network.clone(), 1, Duration::ZERO);
    let initial = mailserver_from_seed(1);

    state.replace_nodes(to_map(&[initial.clone()]));
    state.node_added(initial.id);

    // Target is reached, new nodes are not dialed.
    state.replace_nodes(to_map(&nodes([1, 2, 3])));
    assert_eq!(network.connected_peers(), vec![initial.id]);
}

#[tokio::test]
async fn only_known_node_is_kept() {
    let network = Arc::new(MemoryNetwork::new());
    let mut state = InternalState::new(network.clone(), 1, Duration::ZERO);
    let initial = mailserver_from_seed(1);

    state.replace_nodes(to_map(&[initial.clone()]));
    state.node_added(initial.id);
    state.node_disconnected(initial.id);

    assert!(state.connected.contains(&initial.id));
    assert_eq!(network.connected_peers(), vec![initial.id]);
}

#[tokio::test]
async fn process_replacement_waits_for_connections() {
    let network = Arc::new(MemoryNetwork::new());
    let mut events = network.subscribe_peer_events();
    let mut state = InternalState::new(network.clone(), 1, Duration::from_secs(1));

    state
        .process_replacement(nodes([1, 2]), &mut events, &CancellationToken::new())
        .await;
    assert_eq!(state.connected.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn process_replacement_times_out() {
    let network = Arc::new(MemoryNetwork::new());
    // Events of another node never report any of our connections.
    let other = MemoryNetwork::new();
    let mut events = other.subscribe_peer_events();
    let mut state = InternalState::new(network.clone(), 1, Duration::from_secs(5));

    state
        .process_replacement(nodes([1, 2]), &mut events, &CancellationToken::new())
        .await;
    assert!(state.connected.is_empty());
    assert_eq!(state.current_nodes.len(), 2);
}

#[tokio::test]
async fn dropped_peer_is_replaced() {
    let network = Arc::new(MemoryNetwork::new());
    let (manager, handle) = ConnectionManager::spawn(network.clone(), config(1, 1));

    manager.notify(nodes([1, 2, 3])).await.unwrap();
    eventually(|| network.connected_peers().len() == 1).await;
    let initial = network.connected_peers()[0];

    network.emit_peer_event(PeerEvent::Dropped(initial));
    eventually(|| {
        let connected = network.connected_peers();
        connected.len() == 1 && connected[0] != initial
    })
    .await;

    manager.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn notified_nodes_replace_connection() {
    let network = Arc::new(MemoryNetwork::new());
    let (manager, handle) = ConnectionManager::spawn(network.clone(), config(1, 1));
    let all = nodes([1, 2, 3]);

    manager.notify(all[..1].to_vec()).await.unwrap();
    eventually(|| network.connected_peers() == vec![all[0].id]).await;

    manager.notify(all[1..].to_vec()).await.unwrap();
    eventually(|| {
        let connected = network.connected_peers();
        connected.len() == 1 && (connected[0] == all[1].id || connected[0] == all[2].id)
    })
    .await;

    manager.shutdown();
    handle.await.unwrap();
}

async fn connect_and_send_request(
    network: &Arc<MemoryNetwork>,
    max_failures: usize,
    hash: Hash,
) -> (ConnectionManager, PeerId) {
    let (manager, _handle) = ConnectionManager::spawn(network.clone(), config(1, max_failures));

    manager.notify(nodes([1, 2])).await.unwrap();
    eventually(|| network.connected_peers().len() == 1).await;
    let initial = network.connected_peers()[0];

    network.emit_envelope_event(EnvelopeEvent::new(
        EnvelopeEventType::MailServerRequestSent,
        hash,
        initial,
    ));

    (manager, initial)
}

fn expired(hash: Hash, peer: PeerId) -> EnvelopeEvent {
    EnvelopeEvent::new(EnvelopeEventType::MailServerRequestExpired, hash, peer)
}

#[tokio::test]
async fn connection_changed_after_expiry() {
    let network = Arc::new(MemoryNetwork::new());
    let hash = Hash::from_bytes([1; 32]);
    let (manager, initial) = connect_and_send_request(&network, 1, hash).await;

    network.emit_envelope_event(expired(hash, initial));
    eventually(|| {
        let connected = network.connected_peers();
        connected.len() == 1 && connected[0] != initial
    })
    .await;

    manager.shutdown();
}

#[tokio::test]
async fn connection_changed_after_second_expiry() {
    let network = Arc::new(MemoryNetwork::new());
    let hash = Hash::from_bytes([1; 32]);
    let (manager, initial) = connect_and_send_request(&network, 2, hash).await;

    network.emit_envelope_event(expired(hash, initial));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(network.connected_peers(), vec![initial]);

    // A repeated event for the same request doesn't count twice.
    network.emit_envelope_event(expired(hash, initial));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(network.connected_peers(), vec![initial]);

    let second = Hash::from_bytes([2; 32]);
    network.emit_envelope_event(EnvelopeEvent::new(
        EnvelopeEventType::MailServerRequestSent,
        second,
        initial,
    ));
    network.emit_envelope_event(expired(second, initial));
    eventually(|| {
        let connected = network.connected_peers();
        connected.len() == 1 && connected[0] != initial
    })
    .await;

    manager.shutdown();
}

#[tokio::test]
async fn completed_request_resets_failures() {
    let network = Arc::new(MemoryNetwork::new());
    let hash = Hash::from_bytes([1; 32]);
    let (manager, initial) = connect_and_send_request(&network, 2, hash).await;

    network.emit_envelope_event(expired(hash, initial));
    network.emit_envelope_event(EnvelopeEvent::new(
        EnvelopeEventType::MailServerRequestCompleted(MailServerResponse::default()),
        Hash::from_bytes([2; 32]),
        initial,
    ));

    // The failure count starts over, one more expiry isn't enough.
    let second = Hash::from_bytes([3; 32]);
    network.emit_envelope_event(EnvelopeEvent::new(
        EnvelopeEventType::MailServerRequestSent,
        second,
        initial,
    ));
    network.emit_envelope_event(expired(second, initial));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(network.connected_peers(), vec![initial]);

    manager.shutdown();
}

#[tokio::test]
async fn used_records_are_added_first() {
    let store = MemoryStore::new();
    let all = nodes([1, 2, 3]);
    store.replace_mailservers(&all).await.unwrap();
    store
        .update_mailserver(MailserverRecord {
            last_used: 100,
            ..MailserverRecord::from(all[1].clone())
        })
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    let manager = ConnectionManager::from_sender(tx);
    ensure_used_records_added_first(&store, &manager)
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap(), vec![all[1].clone()]);
    assert_eq!(
        rx.recv().await.unwrap(),
        vec![all[1].clone(), all[0].clone(), all[2].clone()]
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unused_records_are_added_at_once() {
    let store = MemoryStore::new();
    let all = nodes([1, 2]);
    store.replace_mailservers(&all).await.unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    let manager = ConnectionManager::from_sender(tx);
    ensure_used_records_added_first(&store, &manager)
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap(), all);
    assert!(rx.try_recv().is_err());

    // Nothing to do without cached records.
    let (tx, mut rx) = mpsc::channel(4);
    let manager = ConnectionManager::from_sender(tx);
    ensure_used_records_added_first(&MemoryStore::new(), &manager)
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn peer_store_updates_cache() {
    let store = MemoryStore::new();
    let peer_store = PeerStore::new(store.clone());
    let all = nodes([1, 2]);

    peer_store.update(all.clone()).await.unwrap();
    assert!(peer_store.exist(&all[0].id));
    assert_eq!(peer_store.get(&all[1].id), Some(all[1].clone()));
    assert!(!peer_store.exist(&mailserver_from_seed(3).id));
    assert_eq!(store.all_mailservers().await.unwrap().len(), 2);

    peer_store.update(nodes([2])).await.unwrap();
    assert!(!peer_store.exist(&all[0].id));
    assert_eq!(
        store.all_mailservers().await.unwrap(),
        vec![MailserverRecord::from(all[1].clone())]
    );
}

#[tokio::test]
async fn last_used_is_recorded_on_completion() {
    let store = MemoryStore::new();
    let peer_store = Arc::new(PeerStore::new(store.clone()));
    let all = nodes([1, 2]);
    peer_store.update(all.clone()).await.unwrap();

    let (tx, rx) = broadcast::channel(16);
    let (monitor, handle) = LastUsedConnectionMonitor::spawn(peer_store, rx);

    let completed = |peer: PeerId| {
        EnvelopeEvent::new(
            EnvelopeEventType::MailServerRequestCompleted(MailServerResponse::default()),
            Hash::from_bytes([1; 32]),
            peer,
        )
    };
    tx.send(completed(mailserver_from_seed(9).id)).unwrap();
    tx.send(completed(all[0].id)).unwrap();

    for _ in 0..200 {
        let records = store.all_mailservers().await.unwrap();
        if records[0].last_used > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records = store.all_mailservers().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].last_used > 0);
    assert_eq!(records[1].last_used, 0);

    monitor.shutdown();
    handle.await.unwrap();
}
