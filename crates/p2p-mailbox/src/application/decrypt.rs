//! Decryption of observed mailbox entries.
//!
//! Pure functions over the `EncryptionService` port so they can run on the
//! event loop (single entry) or on a blocking worker (batches).

use crate::domain::{DecryptError, DecryptOutcome, MailboxItem, ProtectedMailboxStorageEntry};
use crate::ports::EncryptionService;

/// Try to open one entry with our keys.
pub(crate) fn decrypt_entry(
    encryption: &dyn EncryptionService,
    entry: ProtectedMailboxStorageEntry,
) -> DecryptOutcome {
    let uid = entry.uid().to_string();
    let result = encryption
        .decrypt_and_verify(&entry.payload.prefixed_sealed_and_signed_message.sealed_and_signed);

    match result {
        Ok(decrypted) => match MailboxItem::new(entry, decrypted) {
            Some(item) => DecryptOutcome::Decrypted(Box::new(item)),
            None => DecryptOutcome::Malformed {
                uid,
                reason: "envelope is not a mailbox message".to_string(),
            },
        },
        Err(DecryptError::NotForUs(_)) => DecryptOutcome::NotForUs {
            uid,
            creation_time_stamp: entry.creation_time_stamp,
        },
        Err(DecryptError::Malformed(reason)) => DecryptOutcome::Malformed { uid, reason },
    }
}

/// Decrypt entries in order.
pub(crate) fn decrypt_batch(
    encryption: &dyn EncryptionService,
    entries: Vec<ProtectedMailboxStorageEntry>,
) -> Vec<DecryptOutcome> {
    entries
        .into_iter()
        .map(|entry| decrypt_entry(encryption, entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SealingEncryptionService;
    use crate::domain::{
        MailboxMessage, MailboxStoragePayload, NetworkEnvelope, PrefixedSealedAndSignedMessage,
        MAILBOX_TTL_MILLIS,
    };
    use shared_crypto::{KeyRing, PubKeyRing};
    use shared_types::{NodeAddress, Timestamp};
    use std::sync::Arc;

    fn entry_for(
        sender: &SealingEncryptionService,
        sender_ring: &KeyRing,
        recipient: &PubKeyRing,
        envelope: NetworkEnvelope,
        uid: &str,
    ) -> ProtectedMailboxStorageEntry {
        let payload = MailboxStoragePayload {
            prefixed_sealed_and_signed_message: PrefixedSealedAndSignedMessage {
                sender_node_address: NodeAddress::new("alice.onion", 9999),
                sealed_and_signed: sender.encrypt_and_sign(recipient, &envelope).unwrap(),
                address_prefix_hash: vec![],
                uid: uid.to_string(),
            },
            sender_pub_key_for_add_operation: sender_ring.pub_key_ring().signature_pub_key,
            owner_pub_key: recipient.signature_pub_key,
            ttl_millis: MAILBOX_TTL_MILLIS,
        };
        let hash = payload.hash();
        ProtectedMailboxStorageEntry {
            receivers_pub_key: payload.owner_pub_key,
            payload,
            owner_pub_key: sender_ring.pub_key_ring().signature_pub_key,
            sequence_number: 1,
            signature: sender_ring.sign(&ProtectedMailboxStorageEntry::signing_bytes(&hash, 1)),
            creation_time_stamp: Timestamp::from_millis(77),
        }
    }

    fn mailbox(uid: &str) -> NetworkEnvelope {
        NetworkEnvelope::Mailbox(MailboxMessage::new(
            uid,
            NodeAddress::new("alice.onion", 9999),
            "Ack",
            vec![],
        ))
    }

    #[test]
    fn test_outcomes() {
        let alice = Arc::new(KeyRing::generate());
        let bob = Arc::new(KeyRing::generate());
        let carol = KeyRing::generate();
        let alice_enc = SealingEncryptionService::new(alice.clone());
        let bob_enc = SealingEncryptionService::new(bob.clone());

        let for_bob = entry_for(&alice_enc, &alice, bob.pub_key_ring(), mailbox("m1"), "m1");
        let for_carol = entry_for(&alice_enc, &alice, carol.pub_key_ring(), mailbox("m2"), "m2");
        let direct = entry_for(
            &alice_enc,
            &alice,
            bob.pub_key_ring(),
            NetworkEnvelope::Direct {
                message_type: "Ping".to_string(),
                body: vec![],
            },
            "m3",
        );

        let outcomes = decrypt_batch(&bob_enc, vec![for_bob, for_carol, direct]);
        assert!(matches!(&outcomes[0], DecryptOutcome::Decrypted(item) if item.uid() == "m1"));
        assert_eq!(
            outcomes[1],
            DecryptOutcome::NotForUs {
                uid: "m2".to_string(),
                creation_time_stamp: Timestamp::from_millis(77),
            }
        );
        assert!(matches!(&outcomes[2], DecryptOutcome::Malformed { uid, .. } if uid == "m3"));
    }
}
