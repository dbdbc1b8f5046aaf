//! Outbound send pipeline.
//!
//! Preconditions, the capability gate and sealing run on the caller's
//! thread. Direct delivery and the overlay fallback run on a spawned task
//! that reports through the [`PendingSend`].

use std::sync::Arc;

use shared_crypto::{Ed25519PublicKey, KeyRing, PubKeyRing};
use shared_types::{Capability, NodeAddress};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::service::MailboxPorts;
use crate::domain::{
    BootstrapState, BroadcastResult, MailboxError, MailboxMessage, MailboxStoragePayload,
    NetworkEnvelope, OverlayError, PrefixedSealedAndSignedMessage, SendOutcome,
};
use crate::ports::PendingSend;

pub(crate) struct SendPipeline {
    key_ring: Arc<KeyRing>,
    ports: Arc<MailboxPorts>,
    bootstrap: watch::Receiver<BootstrapState>,
    runtime: Handle,
}

impl SendPipeline {
    pub(crate) fn new(
        key_ring: Arc<KeyRing>,
        ports: Arc<MailboxPorts>,
        bootstrap: watch::Receiver<BootstrapState>,
        runtime: Handle,
    ) -> Self {
        Self {
            key_ring,
            ports,
            bootstrap,
            runtime,
        }
    }

    pub(crate) fn send(
        &self,
        peer: &NodeAddress,
        peers_pub_key_ring: Option<PubKeyRing>,
        message: MailboxMessage,
    ) -> Result<PendingSend, MailboxError> {
        let Some(peers_pub_key_ring) = peers_pub_key_ring else {
            warn!(uid = %message.uid, %peer, "[mailbox] no public key ring for recipient");
            return Ok(fault(MailboxError::MissingPubKeyRing));
        };
        let own_address = self
            .ports
            .network_node
            .node_address()
            .ok_or(MailboxError::OwnAddressUnknown)?;
        if &peers_pub_key_ring == self.key_ring.pub_key_ring() {
            return Err(MailboxError::SelfSend);
        }
        if let Err(e) = check_network_ready(&self.ports, &self.bootstrap) {
            return Ok(fault(e));
        }
        if !self.peer_supports(peer, &message) {
            return Ok(fault(MailboxError::CapabilityUnsupported {
                peer: peer.to_string(),
            }));
        }

        let uid = message.uid.clone();
        let ttl_millis = message.ttl_millis;
        let sealed = match self
            .ports
            .encryption
            .encrypt_and_sign(&peers_pub_key_ring, &NetworkEnvelope::Mailbox(message))
        {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(%uid, error = %e, "[mailbox] sealing mailbox message failed");
                return Ok(fault(MailboxError::CryptoFailure(e.to_string())));
            }
        };

        let delivery = Delivery {
            key_ring: Arc::clone(&self.key_ring),
            ports: Arc::clone(&self.ports),
            bootstrap: self.bootstrap.clone(),
            peer: peer.clone(),
            receivers_pub_key: peers_pub_key_ring.signature_pub_key,
            ttl_millis,
            message: PrefixedSealedAndSignedMessage {
                sender_node_address: own_address,
                sealed_and_signed: sealed,
                address_prefix_hash: self.address_prefix_hash(peer),
                uid,
            },
        };

        let (tx, pending) = PendingSend::channel();
        self.runtime.spawn(async move {
            let outcome = delivery.run().await;
            let _ = tx.send(outcome);
        });
        Ok(pending)
    }

    /// Unknown capability sets count as unsupported.
    fn peer_supports(&self, peer: &NodeAddress, message: &MailboxMessage) -> bool {
        let Some(required) = message.required_capabilities() else {
            return true;
        };
        match self.ports.peer_manager.find_peers_capabilities(peer) {
            Some(capabilities) if capabilities.contains_all(required) => true,
            Some(_) => {
                warn!(uid = %message.uid, %peer, "[mailbox] peer lacks required capabilities; not sending");
                false
            }
            None => {
                warn!(uid = %message.uid, %peer, "[mailbox] peer capabilities unknown; not sending");
                false
            }
        }
    }

    fn address_prefix_hash(&self, peer: &NodeAddress) -> Vec<u8> {
        if self
            .ports
            .peer_manager
            .peer_has_capability(peer, Capability::NoAddressPrefix)
        {
            Vec::new()
        } else {
            peer.address_prefix_hash()
        }
    }
}

fn fault(error: MailboxError) -> PendingSend {
    PendingSend::resolved(SendOutcome::Fault(error))
}

fn check_network_ready(
    ports: &MailboxPorts,
    bootstrap: &watch::Receiver<BootstrapState>,
) -> Result<(), MailboxError> {
    if !bootstrap.borrow().is_bootstrapped() {
        return Err(MailboxError::NotReady("not bootstrapped yet".to_string()));
    }
    if ports.network_node.connection_count() == 0 {
        return Err(MailboxError::NotReady(
            "no P2P network nodes connected".to_string(),
        ));
    }
    Ok(())
}

/// State carried by one in-flight send.
struct Delivery {
    key_ring: Arc<KeyRing>,
    ports: Arc<MailboxPorts>,
    bootstrap: watch::Receiver<BootstrapState>,
    peer: NodeAddress,
    receivers_pub_key: Ed25519PublicKey,
    ttl_millis: u64,
    message: PrefixedSealedAndSignedMessage,
}

impl Delivery {
    async fn run(self) -> SendOutcome {
        let uid = self.message.uid.clone();
        let direct = self
            .ports
            .network_node
            .send_message(&self.peer, self.message.clone())
            .await;
        match direct {
            Ok(_) => {
                info!(%uid, peer = %self.peer, "[mailbox] message arrived at peer");
                SendOutcome::Arrived
            }
            Err(e) => {
                info!(%uid, peer = %self.peer, reason = %e, "[mailbox] peer offline; storing in mailbox");
                match self.add_mailbox_data().await {
                    Ok(()) => SendOutcome::StoredInMailbox,
                    Err(e) => {
                        warn!(%uid, error = %e, "[mailbox] storing in mailbox failed");
                        SendOutcome::Fault(e)
                    }
                }
            }
        }
    }

    async fn add_mailbox_data(self) -> Result<(), MailboxError> {
        check_network_ready(&self.ports, &self.bootstrap)?;
        let own_address = self
            .ports
            .network_node
            .node_address()
            .ok_or(MailboxError::OwnAddressUnknown)?;

        let payload = MailboxStoragePayload {
            prefixed_sealed_and_signed_message: self.message,
            sender_pub_key_for_add_operation: self.key_ring.pub_key_ring().signature_pub_key,
            owner_pub_key: self.receivers_pub_key,
            ttl_millis: self.ttl_millis,
        };
        let entry = self
            .ports
            .data_storage
            .get_mailbox_data_with_signed_seq_nr(payload, &self.key_ring, self.receivers_pub_key)
            .map_err(|e| {
                error!(error = %e, "[mailbox] signing mailbox entry failed");
                MailboxError::CryptoFailure(e.to_string())
            })?;

        let added = self
            .ports
            .data_storage
            .add_protected_storage_entry(entry, &own_address)
            .await;
        match added {
            Ok(BroadcastResult::Sufficient { completed }) => {
                info!(completed, "[mailbox] mailbox entry sufficiently broadcast");
                Ok(())
            }
            Ok(BroadcastResult::Insufficient { completed, failed }) => {
                Err(MailboxError::BroadcastInsufficient { completed, failed })
            }
            Err(OverlayError::DuplicateEntry) => {
                error!("[mailbox] overlay already holds this mailbox entry");
                Err(MailboxError::DuplicateEntry)
            }
            Err(OverlayError::InvalidSignature) => Err(MailboxError::CryptoFailure(
                "overlay rejected entry signature".to_string(),
            )),
        }
    }
}
