//! # Inbound Ports
//!
//! API trait defining what the mailbox service offers to the trade,
//! dispute and notification layers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use shared_crypto::PubKeyRing;
use shared_types::NodeAddress;
use tokio::sync::oneshot;

use crate::domain::{
    BootstrapState, DecryptedMessageWithPubKey, MailboxError, MailboxMessage, SendOutcome,
};

/// Callback raised once per newly decrypted mailbox item.
///
/// Runs on the mailbox event loop, so it should return quickly. A panic is
/// caught and logged; the remaining listeners still run.
pub type DecryptedMailboxListener =
    Arc<dyn Fn(&DecryptedMessageWithPubKey, &NodeAddress) + Send + Sync>;

/// Mailbox messaging API - inbound port.
#[async_trait]
pub trait MailboxMessagingApi: Send + Sync {
    /// Send `message` to `peer`, directly if it is online, otherwise via the
    /// overlay.
    ///
    /// Returns `Err` only for caller mistakes. Every other failure resolves
    /// the returned [`PendingSend`] to [`SendOutcome::Fault`].
    fn send_encrypted_mailbox_message(
        &self,
        peer: &NodeAddress,
        peers_pub_key_ring: Option<PubKeyRing>,
        message: MailboxMessage,
    ) -> Result<PendingSend, MailboxError>;

    /// Forget every item under the message's uid and remove them from the
    /// overlay. Retried later if not bootstrapped yet.
    fn remove_mailbox_msg(&self, decrypted: &DecryptedMessageWithPubKey);

    /// First recorded message per uid.
    async fn get_my_mailbox_messages(&self) -> Vec<DecryptedMessageWithPubKey>;

    /// Register a listener for newly decrypted mailbox items.
    fn add_decrypted_mailbox_listener(&self, listener: DecryptedMailboxListener) -> ListenerHandle;

    /// Transport is ready; start the initial data request.
    fn on_tor_node_ready(&self);

    /// Hidden service published.
    fn on_hidden_service_published(&self);

    /// Preliminary data arrived.
    fn on_preliminary_data_received(&self);

    /// Initial data sync completed.
    fn on_updated_data_received(&self);

    /// Current bootstrap state.
    fn bootstrap_state(&self) -> BootstrapState;

    /// Stop the event loop. Pending retries are dropped.
    fn shutdown(&self);
}

/// Completion of one send.
///
/// Resolves to [`SendOutcome::Fault`] with [`MailboxError::ServiceStopped`]
/// if the send task goes away without reporting.
#[derive(Debug)]
pub struct PendingSend {
    rx: oneshot::Receiver<SendOutcome>,
}

impl PendingSend {
    /// Pair of reporting end and pending future.
    pub fn channel() -> (oneshot::Sender<SendOutcome>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Already-completed send.
    pub fn resolved(outcome: SendOutcome) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(outcome);
        pending
    }
}

impl Future for PendingSend {
    type Output = SendOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(SendOutcome::Fault(MailboxError::ServiceStopped)))
    }
}

/// Registration of a [`DecryptedMailboxListener`].
///
/// Dropping the handle deregisters the listener.
pub struct ListenerHandle {
    id: u64,
    deregister: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl ListenerHandle {
    /// Wrap a registration id and its deregistration hook.
    pub fn new(id: u64, deregister: impl FnOnce(u64) + Send + Sync + 'static) -> Self {
        Self {
            id,
            deregister: Some(Box::new(deregister)),
        }
    }

    /// Registration id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deregister now.
    pub fn remove(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(deregister) = self.deregister.take() {
            deregister(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_pending_send_resolved() {
        let outcome = PendingSend::resolved(SendOutcome::Arrived).await;
        assert_eq!(outcome, SendOutcome::Arrived);
    }

    #[tokio::test]
    async fn test_pending_send_dropped_sender() {
        let (tx, pending) = PendingSend::channel();
        drop(tx);
        assert_eq!(
            pending.await,
            SendOutcome::Fault(MailboxError::ServiceStopped)
        );
    }

    #[test]
    fn test_listener_handle_deregisters_once() {
        let removed = Arc::new(AtomicU64::new(0));
        let r = removed.clone();
        let handle = ListenerHandle::new(7, move |id| {
            r.fetch_add(id, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);
        handle.remove();
        assert_eq!(removed.load(Ordering::SeqCst), 7);
    }
}
