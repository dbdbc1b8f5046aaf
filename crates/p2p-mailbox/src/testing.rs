//! Centralized Testing Utilities
//!
//! Deterministic doubles for every outbound port, with call counters, plus
//! [`TestNode`], which wires a full mailbox service from them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_crypto::{CryptoError, Ed25519PublicKey, KeyRing, PubKeyRing, SealedAndSigned};
use shared_types::{Capabilities, Capability, NodeAddress, PayloadHash, Timestamp};
use tokio::sync::{broadcast, mpsc};

use crate::adapters::{InMemoryDataStore, SealingEncryptionService};
use crate::application::{MailboxMessageService, MailboxPorts};
use crate::config::MailboxConfig;
use crate::domain::{
    BroadcastResult, Connection, DecryptError, DecryptedMessageWithPubKey, IgnoredMailboxMap,
    MailboxMessageList, MailboxStoragePayload, NetworkEnvelope, NetworkError, OverlayError,
    PersistenceError, PrefixedSealedAndSignedMessage, ProtectedMailboxStorageEntry,
    ProtectedStorageEntry, StorageChange,
};
use crate::ports::{
    EncryptionService, ListenerHandle, MailboxMessagingApi, NetworkNode, P2PDataStorage,
    PeerManager, PersistenceManager, RequestDataManager, SeedNodeRepository, TimeSource,
};

/// A time source that returns a settable timestamp (milliseconds).
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    millis: AtomicU64,
}

impl FixedTimeSource {
    /// Start at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Jump to `millis`.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Transport double. Direct sends fail unless the peer is marked online.
pub struct MockNetworkNode {
    address: RwLock<Option<NodeAddress>>,
    connections: AtomicUsize,
    online_peers: RwLock<HashSet<NodeAddress>>,
    sent: Mutex<Vec<(NodeAddress, PrefixedSealedAndSignedMessage)>>,
}

impl MockNetworkNode {
    /// Node at `address` with one open connection.
    pub fn new(address: Option<NodeAddress>) -> Self {
        Self {
            address: RwLock::new(address),
            connections: AtomicUsize::new(1),
            online_peers: RwLock::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Change our own address.
    pub fn set_address(&self, address: Option<NodeAddress>) {
        *self.address.write() = address;
    }

    /// Change the open connection count.
    pub fn set_connections(&self, count: usize) {
        self.connections.store(count, Ordering::SeqCst);
    }

    /// Let direct sends to `peer` succeed.
    pub fn set_peer_online(&self, peer: NodeAddress, online: bool) {
        let mut peers = self.online_peers.write();
        if online {
            peers.insert(peer);
        } else {
            peers.remove(&peer);
        }
    }

    /// Direct send attempts so far.
    pub fn send_calls(&self) -> usize {
        self.sent.lock().len()
    }

    /// Everything passed to `send_message`.
    pub fn sent_messages(&self) -> Vec<(NodeAddress, PrefixedSealedAndSignedMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NetworkNode for MockNetworkNode {
    fn node_address(&self) -> Option<NodeAddress> {
        self.address.read().clone()
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn send_message(
        &self,
        peer: &NodeAddress,
        message: PrefixedSealedAndSignedMessage,
    ) -> Result<Connection, NetworkError> {
        self.sent.lock().push((peer.clone(), message));
        if self.online_peers.read().contains(peer) {
            Ok(Connection { peer: peer.clone() })
        } else {
            Err(NetworkError::PeerUnreachable(peer.to_string()))
        }
    }
}

/// Capability table double. Unknown peers have no capability set.
#[derive(Default)]
pub struct MockPeerManager {
    capabilities: RwLock<HashMap<NodeAddress, Capabilities>>,
}

impl MockPeerManager {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what `peer` announced.
    pub fn set_capabilities(&self, peer: NodeAddress, capabilities: Capabilities) {
        self.capabilities.write().insert(peer, capabilities);
    }
}

impl PeerManager for MockPeerManager {
    fn peer_has_capability(&self, peer: &NodeAddress, capability: Capability) -> bool {
        self.capabilities
            .read()
            .get(peer)
            .is_some_and(|caps| caps.contains(capability))
    }

    fn find_peers_capabilities(&self, peer: &NodeAddress) -> Option<Capabilities> {
        self.capabilities.read().get(peer).cloned()
    }
}

/// Initial data request double.
#[derive(Default)]
pub struct MockRequestDataManager {
    seed_nodes_available: AtomicBool,
    calls: AtomicUsize,
}

impl MockRequestDataManager {
    /// No seed nodes by default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a seed node answers the request.
    pub fn set_seed_nodes_available(&self, available: bool) {
        self.seed_nodes_available.store(available, Ordering::SeqCst);
    }

    /// Requests so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestDataManager for MockRequestDataManager {
    fn request_preliminary_data(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seed_nodes_available.load(Ordering::SeqCst)
    }
}

/// Seed node list double.
#[derive(Default)]
pub struct MockSeedNodeRepository {
    seeds: RwLock<HashSet<NodeAddress>>,
}

impl MockSeedNodeRepository {
    /// No seed nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `address` as a seed node.
    pub fn add_seed_node(&self, address: NodeAddress) {
        self.seeds.write().insert(address);
    }
}

impl SeedNodeRepository for MockSeedNodeRepository {
    fn is_seed_node(&self, address: &NodeAddress) -> bool {
        self.seeds.read().contains(address)
    }
}

/// Real sealing with call counters.
pub struct CountingEncryptionService {
    inner: SealingEncryptionService,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl CountingEncryptionService {
    /// Count calls to a [`SealingEncryptionService`] for `key_ring`.
    pub fn new(key_ring: Arc<KeyRing>) -> Self {
        Self {
            inner: SealingEncryptionService::new(key_ring),
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
        }
    }

    /// `encrypt_and_sign` calls so far.
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    /// `decrypt_and_verify` calls so far.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

impl EncryptionService for CountingEncryptionService {
    fn encrypt_and_sign(
        &self,
        peers_pub_key_ring: &PubKeyRing,
        envelope: &NetworkEnvelope,
    ) -> Result<SealedAndSigned, CryptoError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.encrypt_and_sign(peers_pub_key_ring, envelope)
    }

    fn decrypt_and_verify(
        &self,
        sealed: &SealedAndSigned,
    ) -> Result<DecryptedMessageWithPubKey, DecryptError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt_and_verify(sealed)
    }
}

/// Overlay wrapper counting adds and removals.
pub struct CountingDataStorage {
    inner: Arc<dyn P2PDataStorage>,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl CountingDataStorage {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn P2PDataStorage>) -> Self {
        Self {
            inner,
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        }
    }

    /// `add_protected_storage_entry` calls so far.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// `remove` calls so far.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl P2PDataStorage for CountingDataStorage {
    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.subscribe()
    }

    fn snapshot(&self) -> Vec<ProtectedStorageEntry> {
        self.inner.snapshot()
    }

    fn contains(&self, hash: &PayloadHash) -> bool {
        self.inner.contains(hash)
    }

    fn get_mailbox_data_with_signed_seq_nr(
        &self,
        payload: MailboxStoragePayload,
        key_ring: &KeyRing,
        receivers_pub_key: Ed25519PublicKey,
    ) -> Result<ProtectedMailboxStorageEntry, CryptoError> {
        self.inner
            .get_mailbox_data_with_signed_seq_nr(payload, key_ring, receivers_pub_key)
    }

    async fn add_protected_storage_entry(
        &self,
        entry: ProtectedMailboxStorageEntry,
        sender: &NodeAddress,
    ) -> Result<BroadcastResult, OverlayError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_protected_storage_entry(entry, sender).await
    }

    fn remove(&self, entry: ProtectedMailboxStorageEntry, sender: &NodeAddress) -> bool {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(entry, sender)
    }
}

/// In-memory persistence counting writes.
pub struct MemoryPersistence<T> {
    value: Mutex<Option<T>>,
    writes: AtomicUsize,
}

impl<T: Clone> MemoryPersistence<T> {
    /// Nothing persisted yet.
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    /// Start with `value` already persisted.
    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Last persisted value.
    pub fn value(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl<T: Clone> Default for MemoryPersistence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> PersistenceManager<T> for MemoryPersistence<T> {
    fn read_persisted(&self) -> Result<Option<T>, PersistenceError> {
        Ok(self.value.lock().clone())
    }

    fn request_persistence(&self, value: &T) -> Result<(), PersistenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.value.lock() = Some(value.clone());
        Ok(())
    }
}

/// Poll `check` every 10ms until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// One listener notification.
pub type Notification = (DecryptedMessageWithPubKey, NodeAddress);

/// A mailbox service wired to test doubles.
pub struct TestNode {
    /// Our address.
    pub address: NodeAddress,
    /// Our key ring.
    pub key_ring: Arc<KeyRing>,
    /// Transport double.
    pub network: Arc<MockNetworkNode>,
    /// Capability table.
    pub peers: Arc<MockPeerManager>,
    /// Initial data request double.
    pub request_data: Arc<MockRequestDataManager>,
    /// Seed node list.
    pub seed_nodes: Arc<MockSeedNodeRepository>,
    /// Counting encryption.
    pub encryption: Arc<CountingEncryptionService>,
    /// Persisted mailbox items.
    pub mailbox_store: Arc<MemoryPersistence<MailboxMessageList>>,
    /// Persisted ignored uids.
    pub ignored_store: Arc<MemoryPersistence<IgnoredMailboxMap>>,
    /// Clock.
    pub time: Arc<FixedTimeSource>,
    /// The service under test.
    pub service: MailboxMessageService,
}

impl TestNode {
    /// Start building a node listening on `host:9999`.
    pub fn builder(host: &str) -> TestNodeBuilder {
        TestNodeBuilder {
            address: NodeAddress::new(host, 9999),
            overlay: None,
            time: None,
            config: MailboxConfig::for_testing(),
            key_ring: None,
            persisted_items: None,
            persisted_ignored: None,
        }
    }

    /// Our public key ring.
    pub fn pub_key_ring(&self) -> PubKeyRing {
        *self.key_ring.pub_key_ring()
    }

    /// Bootstrap without seed nodes and wait until the snapshot replay was
    /// admitted.
    pub async fn bootstrap(&self) {
        self.request_data.set_seed_nodes_available(false);
        self.service.on_tor_node_ready();
        self.sync().await;
    }

    /// Round-trip through the event loop so earlier commands are applied.
    pub async fn sync(&self) {
        self.service.get_my_mailbox_messages().await;
    }

    /// Forward listener notifications into a channel.
    pub fn listen(&self) -> (mpsc::UnboundedReceiver<Notification>, ListenerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.service.add_listener(move |decrypted, sender| {
            let _ = tx.send((decrypted.clone(), sender.clone()));
        });
        (rx, handle)
    }
}

/// Builder for [`TestNode`].
pub struct TestNodeBuilder {
    address: NodeAddress,
    overlay: Option<Arc<dyn P2PDataStorage>>,
    time: Option<Arc<FixedTimeSource>>,
    config: MailboxConfig,
    key_ring: Option<Arc<KeyRing>>,
    persisted_items: Option<MailboxMessageList>,
    persisted_ignored: Option<IgnoredMailboxMap>,
}

impl TestNodeBuilder {
    /// Share an overlay with other nodes.
    pub fn overlay(mut self, overlay: Arc<dyn P2PDataStorage>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Share a clock with other nodes.
    pub fn time(mut self, time: Arc<FixedTimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    /// Override the configuration.
    pub fn config(mut self, config: MailboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a fixed key ring.
    pub fn key_ring(mut self, key_ring: Arc<KeyRing>) -> Self {
        self.key_ring = Some(key_ring);
        self
    }

    /// Pretend these items were persisted by a previous run.
    pub fn persisted_items(mut self, items: MailboxMessageList) -> Self {
        self.persisted_items = Some(items);
        self
    }

    /// Pretend these uids were ignored by a previous run.
    pub fn persisted_ignored(mut self, ignored: IgnoredMailboxMap) -> Self {
        self.persisted_ignored = Some(ignored);
        self
    }

    /// Wire the doubles and start the service. Needs a Tokio runtime.
    pub fn start(self) -> TestNode {
        let time = self
            .time
            .unwrap_or_else(|| Arc::new(FixedTimeSource::new(1_000)));
        let overlay: Arc<dyn P2PDataStorage> = match self.overlay {
            Some(overlay) => overlay,
            None => Arc::new(InMemoryDataStore::new(time.clone())),
        };
        let key_ring = self.key_ring.unwrap_or_else(|| Arc::new(KeyRing::generate()));

        let network = Arc::new(MockNetworkNode::new(Some(self.address.clone())));
        let peers = Arc::new(MockPeerManager::new());
        let request_data = Arc::new(MockRequestDataManager::new());
        let seed_nodes = Arc::new(MockSeedNodeRepository::new());
        let encryption = Arc::new(CountingEncryptionService::new(key_ring.clone()));
        let mailbox_store = Arc::new(match self.persisted_items {
            Some(items) => MemoryPersistence::with_value(items),
            None => MemoryPersistence::new(),
        });
        let ignored_store = Arc::new(match self.persisted_ignored {
            Some(ignored) => MemoryPersistence::with_value(ignored),
            None => MemoryPersistence::new(),
        });

        let ports = MailboxPorts {
            network_node: network.clone(),
            peer_manager: peers.clone(),
            data_storage: overlay,
            request_data_manager: request_data.clone(),
            seed_nodes: seed_nodes.clone(),
            encryption: encryption.clone(),
            mailbox_persistence: mailbox_store.clone(),
            ignored_persistence: ignored_store.clone(),
            time_source: time.clone(),
        };
        let service = MailboxMessageService::start(self.config, key_ring.clone(), ports);

        TestNode {
            address: self.address,
            key_ring,
            network,
            peers,
            request_data,
            seed_nodes,
            encryption,
            mailbox_store,
            ignored_store,
            time,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_time_source() {
        let time = FixedTimeSource::new(10);
        assert_eq!(time.now(), Timestamp::from_millis(10));
        time.advance(5);
        assert_eq!(time.now(), Timestamp::from_millis(15));
        time.set(3);
        assert_eq!(time.now(), Timestamp::from_millis(3));
    }

    #[tokio::test]
    async fn test_mock_network_online_peers() {
        let node = MockNetworkNode::new(None);
        let bob = NodeAddress::new("bob.onion", 1);
        let alice = KeyRing::generate();
        let sealed = shared_crypto::seal_and_sign(&alice, alice.pub_key_ring(), b"x").unwrap();
        let message = PrefixedSealedAndSignedMessage {
            sender_node_address: NodeAddress::new("alice.onion", 1),
            sealed_and_signed: sealed,
            address_prefix_hash: vec![],
            uid: "m1".to_string(),
        };

        assert!(node.send_message(&bob, message.clone()).await.is_err());
        node.set_peer_online(bob.clone(), true);
        assert!(node.send_message(&bob, message).await.is_ok());
        assert_eq!(node.send_calls(), 2);
    }

    #[test]
    fn test_mock_peer_manager_unknown_peer() {
        let peers = MockPeerManager::new();
        let bob = NodeAddress::new("bob.onion", 1);
        assert!(peers.find_peers_capabilities(&bob).is_none());
        assert!(!peers.peer_has_capability(&bob, Capability::NoAddressPrefix));

        peers.set_capabilities(bob.clone(), [Capability::NoAddressPrefix].into_iter().collect());
        assert!(peers.peer_has_capability(&bob, Capability::NoAddressPrefix));
    }

    #[test]
    fn test_memory_persistence_counts_writes() {
        let store: MemoryPersistence<IgnoredMailboxMap> = MemoryPersistence::new();
        assert_eq!(store.read_persisted().unwrap(), None);
        store.request_persistence(&IgnoredMailboxMap::new()).unwrap();
        assert_eq!(store.writes(), 1);
        assert_eq!(store.value(), Some(IgnoredMailboxMap::new()));
    }
}
