// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use assert_matches::assert_matches;
use murmur_core::test_utils::private_key_from_seed;
use murmur_core::{
    SymmetricKey, contact_code_topic, discovery_topic, negotiated_topic, partitioned_topic,
    personal_discovery_topic, topic_for,
};
use murmur_store::{KeysStore, MemoryStore};

use crate::filters::{FilterError, FiltersManager, NegotiatedSecret};
use crate::network::{KeyStore, MAX_POW, MIN_POW, NetworkError};
use crate::test_utils::MemoryNetwork;

async fn setup(
    store: MemoryStore,
    generic_discovery: bool,
) -> (Arc<MemoryNetwork>, FiltersManager<MemoryNetwork, MemoryStore>) {
    let network = Arc::new(MemoryNetwork::new());
    let manager = FiltersManager::new(
        network.clone(),
        store,
        private_key_from_seed(1),
        generic_discovery,
    )
    .await
    .unwrap();
    (network, manager)
}

#[tokio::test]
async fn init_is_idempotent() {
    let (network, manager) = setup(MemoryStore::new(), true).await;
    let own = private_key_from_seed(1).public_key();
    let contact = private_key_from_seed(2).public_key();

    let filters = manager
        .init(&["status".to_string()], &[contact])
        .await
        .unwrap();

    let mut chat_ids: Vec<String> = filters.iter().map(|f| f.chat_id.clone()).collect();
    chat_ids.sort();
    let mut expected = vec![
        contact_code_topic(&own),
        partitioned_topic(&own),
        personal_discovery_topic(&own),
        discovery_topic(),
        "status".to_string(),
        contact_code_topic(&contact),
    ];
    expected.sort();
    assert_eq!(chat_ids, expected);
    assert_eq!(network.subscriptions_count(), 6);

    let again = manager
        .init(&["status".to_string()], &[contact])
        .await
        .unwrap();
    assert_eq!(again, filters);
    assert_eq!(network.subscriptions_count(), 6);
}

#[tokio::test]
async fn public_filter() {
    let (network, manager) = setup(MemoryStore::new(), true).await;

    let filter = manager.load_public("status").await.unwrap();
    assert_eq!(filter.chat_id, "status");
    assert_eq!(filter.topic, topic_for("status"));
    assert!(filter.listen);
    assert!(!filter.one_to_one);
    assert_eq!(filter.identity, None);

    let sym_key_id = filter.sym_key_id.clone().unwrap();
    assert_eq!(
        network.get_sym_key(&sym_key_id).unwrap(),
        SymmetricKey::from_password("status")
    );

    let options = network.subscription(&filter.filter_id).unwrap();
    assert_eq!(options.sym_key_id, Some(sym_key_id));
    assert_eq!(options.min_pow, MIN_POW);
    assert_eq!(options.topics, vec![topic_for("status")]);

    // Loading the same chat again doesn't subscribe twice.
    assert_eq!(manager.load_public("status").await.unwrap(), filter);
    assert_eq!(network.subscriptions_count(), 1);
}

#[tokio::test]
async fn derived_keys_are_persisted() {
    let store = MemoryStore::new();

    {
        let (_network, manager) = setup(store.clone(), true).await;
        manager.load_public("status").await.unwrap();
    }

    let keys = store.all_keys().await.unwrap();
    assert_eq!(keys.get("status"), Some(&SymmetricKey::from_password("status")));
}

#[tokio::test]
async fn persisted_keys_take_precedence() {
    let store = MemoryStore::new();
    let key = SymmetricKey::from_bytes([7; 32]);
    store.add_key("status", &key).await.unwrap();

    // After a restart the key comes from the store, not from deriving it again.
    let (network, manager) = setup(store, true).await;
    let filter = manager.load_public("status").await.unwrap();

    let sym_key_id = filter.sym_key_id.unwrap();
    assert_eq!(network.get_sym_key(&sym_key_id).unwrap(), key);
}

#[tokio::test]
async fn partitioned_filter_without_listening() {
    let (network, manager) = setup(MemoryStore::new(), true).await;
    let contact = private_key_from_seed(2).public_key();

    let filter = manager.load_partitioned(&contact, false).await.unwrap();
    assert_eq!(filter.chat_id, partitioned_topic(&contact));
    assert_eq!(filter.identity, Some(contact.to_hex()));
    assert_eq!(filter.sym_key_id, None);
    assert!(filter.one_to_one);
    assert!(!filter.listen);

    let options = network.subscription(&filter.filter_id).unwrap();
    assert_eq!(options.min_pow, MAX_POW);
    assert!(options.private_key_id.is_some());

    let public = manager.load_public("status").await.unwrap();
    manager.remove_no_listen_filters().await.unwrap();

    assert_eq!(manager.filters().await, vec![public]);
    assert!(network.subscription(&filter.filter_id).is_none());
}

#[tokio::test]
async fn discovery_filters() {
    let own = private_key_from_seed(1).public_key();

    let (_network, manager) = setup(MemoryStore::new(), true).await;
    let filters = manager.load_discovery().await.unwrap();
    assert_eq!(filters.len(), 2);
    assert_eq!(filters[0].chat_id, personal_discovery_topic(&own));
    assert_eq!(filters[1].chat_id, discovery_topic());
    assert!(filters.iter().all(|f| f.discovery && f.listen && f.one_to_one));
    assert!(filters.iter().all(|f| f.is_identity(&own)));

    // Second call returns the existing filters.
    assert_eq!(manager.load_discovery().await.unwrap(), filters);

    let (network, manager) = setup(MemoryStore::new(), false).await;
    let filters = manager.load_discovery().await.unwrap();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].chat_id, personal_discovery_topic(&own));
    assert_eq!(network.subscriptions_count(), 1);
}

#[tokio::test]
async fn negotiated_filter() {
    let (_network, manager) = setup(MemoryStore::new(), true).await;
    let contact = private_key_from_seed(2).public_key();
    let secret = NegotiatedSecret::new(contact, vec![3; 32]);

    let filter = manager.load_negotiated(&secret).await.unwrap();
    assert_eq!(filter.chat_id, negotiated_topic(&contact));
    assert_eq!(filter.topic, topic_for(&hex::encode([3; 32])));
    assert!(filter.negotiated);
    assert!(filter.one_to_one);
    assert!(filter.listen);
    assert!(filter.is_identity(&contact));

    assert_eq!(manager.negotiated_filter(&contact).await, Some(filter.clone()));

    let contact_code = manager.load_contact_code(&contact).await.unwrap();
    let mut by_key = manager.filters_by_public_key(&contact).await;
    by_key.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));
    assert_eq!(by_key, vec![contact_code, filter]);
}

#[tokio::test]
async fn lookups() {
    let (_network, manager) = setup(MemoryStore::new(), true).await;
    let filter = manager.load_public("status").await.unwrap();

    assert_eq!(
        manager.filter_by_chat_id("status").await,
        Some(filter.clone())
    );
    assert_eq!(
        manager.filter_by_filter_id(&filter.filter_id).await,
        Some(filter.clone())
    );
    assert_eq!(
        manager.filter_by_topic(&topic_for("status")).await,
        Some(filter)
    );
    assert_eq!(manager.filter_by_chat_id("unknown").await, None);
    assert_eq!(manager.topics().await, vec![topic_for("status")]);
}

#[tokio::test]
async fn remove_stops_at_first_failure() {
    let (network, manager) = setup(MemoryStore::new(), true).await;
    let a = manager.load_public("a").await.unwrap();
    let b = manager.load_public("b").await.unwrap();
    let c = manager.load_public("c").await.unwrap();

    network.fail_unsubscribe(&b.filter_id);
    assert_matches!(
        manager.remove(&[a.clone(), b.clone(), c.clone()]).await,
        Err(FilterError::Network(NetworkError::Other(_)))
    );

    assert_eq!(manager.filter_by_chat_id("a").await, None);
    assert_eq!(manager.filters().await, vec![b, c]);
    assert!(network.get_sym_key(a.sym_key_id.as_ref().unwrap()).is_err());
}

#[tokio::test]
async fn reset_removes_everything() {
    let (network, manager) = setup(MemoryStore::new(), true).await;
    manager.init(&["status".to_string()], &[]).await.unwrap();
    assert!(network.sym_keys_count() > 0);

    manager.reset().await.unwrap();
    assert!(manager.filters().await.is_empty());
    assert_eq!(network.subscriptions_count(), 0);
    assert_eq!(network.sym_keys_count(), 0);
}

#[tokio::test]
async fn asymmetric_filters_share_key_pair() {
    let (network, manager) = setup(MemoryStore::new(), true).await;
    let contact = private_key_from_seed(2).public_key();

    manager.init(&[], &[]).await.unwrap();
    assert_eq!(network.key_pairs_count(), 1);
    let key_pair_id = manager.key_pair_id().await.unwrap();

    for _ in 0..3 {
        let filter = manager.load_partitioned(&contact, false).await.unwrap();
        let options = network.subscription(&filter.filter_id).unwrap();
        assert_eq!(options.private_key_id, Some(key_pair_id.clone()));

        manager.remove(&[filter]).await.unwrap();
        assert_eq!(network.key_pairs_count(), 1);
    }

    manager.reset().await.unwrap();
    manager.init(&[], &[]).await.unwrap();
    assert_eq!(network.key_pairs_count(), 1);
    assert_eq!(manager.key_pair_id().await.unwrap(), key_pair_id);
}
