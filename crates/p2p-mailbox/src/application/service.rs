//! # Mailbox Message Service
//!
//! Handle to the mailbox subsystem. Cheap calls (preconditions, sealing,
//! bootstrap state) run on the caller's thread; everything that touches the
//! item index or the ignored ledger is forwarded to the event loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_crypto::{KeyRing, PubKeyRing};
use shared_types::NodeAddress;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::send::SendPipeline;
use super::worker::{Command, MailboxEventLoop};
use crate::config::MailboxConfig;
use crate::domain::{
    BootstrapState, DecryptedMessageWithPubKey, IgnoredMailboxMap, MailboxError, MailboxMessage,
    MailboxMessageList,
};
use crate::ports::{
    DecryptedMailboxListener, EncryptionService, ListenerHandle, MailboxMessagingApi, NetworkNode,
    P2PDataStorage, PeerManager, PendingSend, PersistenceManager, RequestDataManager,
    SeedNodeRepository, TimeSource,
};

/// Collaborators the mailbox service depends on.
#[derive(Clone)]
pub struct MailboxPorts {
    /// Transport.
    pub network_node: Arc<dyn NetworkNode>,
    /// Peer capability bookkeeping.
    pub peer_manager: Arc<dyn PeerManager>,
    /// Replicated data overlay.
    pub data_storage: Arc<dyn P2PDataStorage>,
    /// Initial data sync.
    pub request_data_manager: Arc<dyn RequestDataManager>,
    /// Seed node list.
    pub seed_nodes: Arc<dyn SeedNodeRepository>,
    /// Seal and open envelopes with our key ring.
    pub encryption: Arc<dyn EncryptionService>,
    /// Durable mailbox item list.
    pub mailbox_persistence: Arc<dyn PersistenceManager<MailboxMessageList>>,
    /// Durable ignored uid map.
    pub ignored_persistence: Arc<dyn PersistenceManager<IgnoredMailboxMap>>,
    /// Clock.
    pub time_source: Arc<dyn TimeSource>,
}

/// Mailbox Message Service - send, receive, dedupe, notify and remove.
pub struct MailboxMessageService {
    commands: mpsc::UnboundedSender<Command>,
    bootstrap: watch::Receiver<BootstrapState>,
    sender: SendPipeline,
    ports: Arc<MailboxPorts>,
    next_listener_id: AtomicU64,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MailboxMessageService {
    /// Restore persisted state and start the event loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(config: MailboxConfig, key_ring: Arc<KeyRing>, ports: MailboxPorts) -> Self {
        let ports = Arc::new(ports);
        let runtime = Handle::current();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (bootstrap_tx, bootstrap) = watch::channel(BootstrapState::NotBootstrapped);

        let event_loop = MailboxEventLoop::restore(
            &config,
            Arc::clone(&key_ring),
            Arc::clone(&ports),
            bootstrap_tx,
            command_rx,
        );
        let handle = runtime.spawn(event_loop.run());

        Self {
            commands,
            sender: SendPipeline::new(key_ring, Arc::clone(&ports), bootstrap.clone(), runtime),
            bootstrap,
            ports,
            next_listener_id: AtomicU64::new(1),
            event_loop: Mutex::new(Some(handle)),
        }
    }

    /// Register a closure as a [`DecryptedMailboxListener`].
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&DecryptedMessageWithPubKey, &NodeAddress) + Send + Sync + 'static,
    {
        self.add_decrypted_mailbox_listener(Arc::new(listener))
    }

    /// Wait for the event loop to finish after [`MailboxMessagingApi::shutdown`].
    pub async fn join(&self) {
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "[mailbox] event loop ended abnormally");
            }
        }
    }

    fn send_command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("[mailbox] event loop stopped; command dropped");
        }
    }
}

#[async_trait]
impl MailboxMessagingApi for MailboxMessageService {
    fn send_encrypted_mailbox_message(
        &self,
        peer: &NodeAddress,
        peers_pub_key_ring: Option<PubKeyRing>,
        message: MailboxMessage,
    ) -> Result<PendingSend, MailboxError> {
        if self.commands.is_closed() {
            return Err(MailboxError::ServiceStopped);
        }
        self.sender.send(peer, peers_pub_key_ring, message)
    }

    fn remove_mailbox_msg(&self, decrypted: &DecryptedMessageWithPubKey) {
        self.send_command(Command::Remove(decrypted.clone()));
    }

    async fn get_my_mailbox_messages(&self) -> Vec<DecryptedMessageWithPubKey> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Query(reply));
        rx.await.unwrap_or_default()
    }

    fn add_decrypted_mailbox_listener(&self, listener: DecryptedMailboxListener) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.send_command(Command::AddListener { id, listener });

        let commands = self.commands.clone();
        ListenerHandle::new(id, move |id| {
            let _ = commands.send(Command::RemoveListener(id));
        })
    }

    fn on_tor_node_ready(&self) {
        let seed_nodes_available = self.ports.request_data_manager.request_preliminary_data();
        if !seed_nodes_available {
            // No data response will come, so we are as synced as we get.
            info!("[mailbox] no seed nodes available; bootstrapping now");
            self.send_command(Command::Bootstrap);
        }
    }

    fn on_hidden_service_published(&self) {
        debug!("[mailbox] hidden service published");
    }

    fn on_preliminary_data_received(&self) {
        debug!("[mailbox] preliminary data received");
    }

    fn on_updated_data_received(&self) {
        self.send_command(Command::Bootstrap);
    }

    fn bootstrap_state(&self) -> BootstrapState {
        *self.bootstrap.borrow()
    }

    fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Drop for MailboxMessageService {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestNode;

    #[tokio::test]
    async fn test_starts_not_bootstrapped() {
        let node = TestNode::builder("alice.onion").start();
        assert_eq!(
            node.service.bootstrap_state(),
            BootstrapState::NotBootstrapped
        );
    }

    #[tokio::test]
    async fn test_tor_ready_without_seed_nodes_bootstraps() {
        let node = TestNode::builder("alice.onion").start();
        node.request_data.set_seed_nodes_available(false);

        node.service.on_tor_node_ready();
        node.service.get_my_mailbox_messages().await;

        assert_eq!(node.service.bootstrap_state(), BootstrapState::Bootstrapped);
        assert_eq!(node.request_data.calls(), 1);
    }

    #[tokio::test]
    async fn test_tor_ready_with_seed_nodes_waits_for_data() {
        let node = TestNode::builder("alice.onion").start();
        node.request_data.set_seed_nodes_available(true);

        node.service.on_tor_node_ready();
        node.service.on_preliminary_data_received();
        node.service.on_hidden_service_published();
        node.service.get_my_mailbox_messages().await;
        assert_eq!(
            node.service.bootstrap_state(),
            BootstrapState::NotBootstrapped
        );

        node.service.on_updated_data_received();
        node.service.get_my_mailbox_messages().await;
        assert_eq!(node.service.bootstrap_state(), BootstrapState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let node = TestNode::builder("alice.onion").start();
        node.service.shutdown();
        node.service.join().await;

        let result = node.service.send_encrypted_mailbox_message(
            &NodeAddress::new("bob.onion", 9999),
            Some(*KeyRing::generate().pub_key_ring()),
            MailboxMessage::new("m1", node.address.clone(), "Ack", vec![]),
        );
        assert_eq!(result.err(), Some(MailboxError::ServiceStopped));
        assert!(node.service.get_my_mailbox_messages().await.is_empty());
    }
}
