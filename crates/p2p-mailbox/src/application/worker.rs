//! # Mailbox Event Loop
//!
//! The single owner of all mutable mailbox state: the item index, the
//! ignored ledger, the listener table, the bootstrap state and the removal
//! retry timers. Public API calls reach it as [`Command`]s; overlay change
//! events arrive on a broadcast receiver subscribed at bootstrap.
//!
//! Batch decryption runs on the blocking pool, at most
//! `max_concurrent_batches` at a time, and the outcomes are applied back
//! here. Dropping the loop aborts outstanding batches and retries.
//!
//! State changes only mark their aggregate dirty; each aggregate is written
//! at most once per loop iteration.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared_crypto::{CryptoError, KeyRing};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn};

use super::decrypt::{decrypt_batch, decrypt_entry};
use super::service::MailboxPorts;
use crate::config::MailboxConfig;
use crate::domain::{
    BootstrapState, DecryptOutcome, DecryptedMessageWithPubKey, IgnoredMailboxMap, MailboxItem,
    MailboxItemIndex, MailboxMessageList, ProtectedMailboxStorageEntry, ProtectedStorageEntry,
    StorageChange,
};
use crate::ports::DecryptedMailboxListener;

/// Requests from the service handle to the event loop.
pub(crate) enum Command {
    Bootstrap,
    AddListener {
        id: u64,
        listener: DecryptedMailboxListener,
    },
    RemoveListener(u64),
    Remove(DecryptedMessageWithPubKey),
    Query(oneshot::Sender<Vec<DecryptedMessageWithPubKey>>),
    Shutdown,
}

pub(crate) struct MailboxEventLoop {
    remove_retry_delay: Duration,
    max_concurrent_batches: usize,
    key_ring: Arc<KeyRing>,
    ports: Arc<MailboxPorts>,
    index: MailboxItemIndex,
    ignored: IgnoredMailboxMap,
    listeners: BTreeMap<u64, DecryptedMailboxListener>,
    bootstrap: watch::Sender<BootstrapState>,
    commands: mpsc::UnboundedReceiver<Command>,
    changes: Option<broadcast::Receiver<StorageChange>>,
    pending_batches: VecDeque<Vec<ProtectedMailboxStorageEntry>>,
    batches: JoinSet<Vec<DecryptOutcome>>,
    retries: JoinSet<DecryptedMessageWithPubKey>,
    next_batch_id: u64,
    index_dirty: bool,
    ignored_dirty: bool,
}

impl MailboxEventLoop {
    /// Build the loop and restore persisted state.
    pub(crate) fn restore(
        config: &MailboxConfig,
        key_ring: Arc<KeyRing>,
        ports: Arc<MailboxPorts>,
        bootstrap: watch::Sender<BootstrapState>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let now = ports.time_source.now();
        let ttl_millis = config.mailbox_ttl_millis();

        let persisted_items = ports.mailbox_persistence.read_persisted().unwrap_or_else(|e| {
            warn!(error = %e, "[mailbox] could not read persisted mailbox items; starting empty");
            None
        });
        let (index, expired) = MailboxItemIndex::from_persisted(
            persisted_items.unwrap_or_default(),
            now,
            ttl_millis,
        );

        let mut ignored = ports
            .ignored_persistence
            .read_persisted()
            .unwrap_or_else(|e| {
                warn!(error = %e, "[mailbox] could not read ignored mailbox map; starting empty");
                None
            })
            .unwrap_or_default();
        let pruned = ignored.prune_expired(now, ttl_millis);

        let mut event_loop = Self {
            remove_retry_delay: Duration::from_secs(config.remove_retry_delay_secs),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            key_ring,
            ports,
            index,
            ignored,
            listeners: BTreeMap::new(),
            bootstrap,
            commands,
            changes: None,
            pending_batches: VecDeque::new(),
            batches: JoinSet::new(),
            retries: JoinSet::new(),
            next_batch_id: 0,
            index_dirty: expired > 0,
            ignored_dirty: pruned > 0,
        };

        if expired > 0 {
            info!(expired, "[mailbox] dropped expired mailbox items");
        }
        if pruned > 0 {
            info!(pruned, "[mailbox] pruned expired ignored uids");
        }
        event_loop.flush();
        event_loop
    }

    /// Process commands and overlay events until shutdown.
    pub(crate) async fn run(mut self) {
        info!(
            items = self.index.len(),
            ignored = self.ignored.len(),
            "[mailbox] event loop started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                change = next_change(&mut self.changes) => self.handle_change(change),
                Some(joined) = self.batches.join_next() => self.handle_batch(joined),
                Some(joined) = self.retries.join_next() => match joined {
                    Ok(decrypted) => self.remove_mailbox_msg(decrypted),
                    Err(e) => warn!(error = %e, "[mailbox] removal retry task failed"),
                },
            }
            self.flush();
        }

        self.batches.abort_all();
        self.retries.abort_all();
        info!("[mailbox] event loop stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Bootstrap => self.bootstrap(),
            Command::AddListener { id, listener } => {
                self.listeners.insert(id, listener);
            }
            Command::RemoveListener(id) => {
                self.listeners.remove(&id);
            }
            Command::Remove(decrypted) => self.remove_mailbox_msg(decrypted),
            Command::Query(reply) => {
                let _ = reply.send(self.index.first_messages());
            }
            Command::Shutdown => {}
        }
    }

    fn is_bootstrapped(&self) -> bool {
        self.bootstrap.borrow().is_bootstrapped()
    }

    /// Subscribe to the overlay, then replay what it already holds.
    fn bootstrap(&mut self) {
        if self.is_bootstrapped() {
            debug!("[mailbox] already bootstrapped");
            return;
        }
        self.bootstrap.send_replace(BootstrapState::Bootstrapped);
        self.changes = Some(self.ports.data_storage.subscribe());

        let snapshot = self.ports.data_storage.snapshot();
        info!(entries = snapshot.len(), "[mailbox] bootstrapped; replaying overlay snapshot");
        self.on_added(snapshot);
    }

    fn handle_change(&mut self, change: Result<StorageChange, broadcast::error::RecvError>) {
        match change {
            Ok(change) => {
                if !change.removed.is_empty() {
                    debug!(count = change.removed.len(), "[mailbox] overlay entries removed");
                }
                self.on_added(change.added);
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!(lagged = count, "[mailbox] overlay subscriber lagged; replaying snapshot");
                let snapshot = self.ports.data_storage.snapshot();
                self.on_added(snapshot);
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("[mailbox] overlay change stream closed");
                self.changes = None;
            }
        }
    }

    /// Admission path shared by live events and the bootstrap replay.
    fn on_added(&mut self, entries: Vec<ProtectedStorageEntry>) {
        let Some(own_address) = self.ports.network_node.node_address() else {
            debug!("[mailbox] own address unknown; skipping overlay entries");
            return;
        };
        // Seed nodes relay mailbox entries but never consume them.
        if self.ports.seed_nodes.is_seed_node(&own_address) {
            return;
        }

        let mut seen = HashSet::new();
        let mut fresh: Vec<ProtectedMailboxStorageEntry> = entries
            .into_iter()
            .filter_map(ProtectedStorageEntry::into_mailbox)
            .filter(|entry| self.is_new(entry) && seen.insert(entry.hash()))
            .collect();

        if fresh.len() > 1 {
            self.pending_batches.push_back(fresh);
            self.dispatch_batches();
        } else if let Some(entry) = fresh.pop() {
            let outcome = decrypt_entry(self.ports.encryption.as_ref(), entry);
            self.apply_outcome(outcome);
        }
    }

    fn is_new(&self, entry: &ProtectedMailboxStorageEntry) -> bool {
        !self.ignored.is_ignored(entry.uid()) && !self.index.contains_payload(&entry.hash())
    }

    fn dispatch_batches(&mut self) {
        while self.batches.len() < self.max_concurrent_batches {
            let Some(batch) = self.pending_batches.pop_front() else {
                break;
            };
            // State may have moved on while the batch was queued.
            let batch: Vec<_> = batch.into_iter().filter(|e| self.is_new(e)).collect();
            if batch.is_empty() {
                continue;
            }

            self.next_batch_id += 1;
            let span = info_span!("mailbox_batch", batch = self.next_batch_id, count = batch.len());
            let encryption = Arc::clone(&self.ports.encryption);
            self.batches.spawn_blocking(move || {
                let _entered = span.enter();
                let started = Instant::now();
                let count = batch.len();
                let outcomes = decrypt_batch(encryption.as_ref(), batch);
                info!(
                    count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[mailbox] batch decryption finished"
                );
                outcomes
            });
        }
    }

    fn handle_batch(&mut self, joined: Result<Vec<DecryptOutcome>, JoinError>) {
        match joined {
            Ok(outcomes) => {
                for outcome in outcomes {
                    self.apply_outcome(outcome);
                }
            }
            Err(e) => error!(error = %e, "[mailbox] batch decryption task failed"),
        }
        self.dispatch_batches();
    }

    fn apply_outcome(&mut self, outcome: DecryptOutcome) {
        match outcome {
            DecryptOutcome::Decrypted(item) => self.process_mailbox_item(*item),
            DecryptOutcome::NotForUs {
                uid,
                creation_time_stamp,
            } => {
                debug!(%uid, "[mailbox] entry not addressed to us; ignoring uid");
                if self.ignored.ignore(uid, creation_time_stamp) {
                    self.ignored_dirty = true;
                }
            }
            DecryptOutcome::Malformed { uid, reason } => {
                warn!(%uid, %reason, "[mailbox] dropping malformed mailbox entry");
            }
        }
    }

    fn process_mailbox_item(&mut self, item: MailboxItem) {
        let Some(message) = item.mailbox_message() else {
            return;
        };
        let uid = message.uid.clone();
        let sender = message.sender_node_address.clone();
        let message_type = message.message_type.clone();
        let decrypted = item.decrypted_message_with_pub_key.clone();
        let entry = item.protected_mailbox_storage_entry.clone();

        if !self.index.insert(item) {
            debug!(%uid, "[mailbox] mailbox entry already indexed");
            return;
        }
        self.index_dirty = true;

        info!(%uid, %sender, %message_type, "[mailbox] received mailbox message");
        for (id, listener) in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&decrypted, &sender))).is_err() {
                error!(%uid, listener = id, "[mailbox] mailbox listener panicked");
            }
        }

        if self.is_bootstrapped() {
            // The local copy stays until the application removes it.
            if let Err(e) = self.remove_entry_from_network(&entry) {
                error!(%uid, error = %e, "[mailbox] could not sign mailbox removal");
            }
        } else {
            info!(%uid, "[mailbox] not bootstrapped; network removal deferred");
        }
    }

    fn remove_mailbox_msg(&mut self, decrypted: DecryptedMessageWithPubKey) {
        if !self.is_bootstrapped() {
            info!(
                delay_secs = self.remove_retry_delay.as_secs(),
                "[mailbox] not bootstrapped; retrying removal later"
            );
            let delay = self.remove_retry_delay;
            self.retries.spawn(async move {
                tokio::time::sleep(delay).await;
                decrypted
            });
            return;
        }

        let Some(message) = decrypted.mailbox_message() else {
            warn!("[mailbox] cannot remove a non-mailbox envelope");
            return;
        };
        let uid = message.uid.clone();
        let items = self.index.remove_uid(&uid);
        if items.is_empty() {
            debug!(%uid, "[mailbox] nothing to remove");
            return;
        }

        let count = items.len();
        for item in items {
            if let Err(e) = self.remove_entry_from_network(&item.protected_mailbox_storage_entry) {
                error!(%uid, error = %e, "[mailbox] could not sign mailbox removal; keeping item");
                self.index.insert(item);
            }
        }
        self.index_dirty = true;
        info!(%uid, count, "[mailbox] removed mailbox items");
    }

    /// Ask the overlay to drop `entry`, signed by us as receiver.
    fn remove_entry_from_network(
        &self,
        entry: &ProtectedMailboxStorageEntry,
    ) -> Result<(), CryptoError> {
        let uid = entry.uid();
        if !self.ports.data_storage.contains(&entry.hash()) {
            info!(%uid, "[mailbox] mailbox entry already removed from network");
            return Ok(());
        }
        let Some(own_address) = self.ports.network_node.node_address() else {
            warn!(%uid, "[mailbox] own address unknown; cannot remove from network");
            return Ok(());
        };

        let updated = self.ports.data_storage.get_mailbox_data_with_signed_seq_nr(
            entry.payload.clone(),
            &self.key_ring,
            entry.receivers_pub_key,
        )?;
        if self.ports.data_storage.remove(updated, &own_address) {
            info!(%uid, "[mailbox] removed mailbox entry from network");
        } else {
            warn!(%uid, "[mailbox] overlay rejected mailbox removal");
        }
        Ok(())
    }

    /// Write each dirty aggregate once.
    fn flush(&mut self) {
        if std::mem::take(&mut self.index_dirty) {
            let list: MailboxMessageList = self.index.to_list();
            if let Err(e) = self.ports.mailbox_persistence.request_persistence(&list) {
                warn!(error = %e, "[mailbox] failed to persist mailbox items");
            }
        }
        if std::mem::take(&mut self.ignored_dirty) {
            if let Err(e) = self.ports.ignored_persistence.request_persistence(&self.ignored) {
                warn!(error = %e, "[mailbox] failed to persist ignored uids");
            }
        }
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
) -> Result<StorageChange, broadcast::error::RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
