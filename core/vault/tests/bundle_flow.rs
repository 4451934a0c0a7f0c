//! End-to-end flows across identities, bundles and entries.

use std::sync::Arc;
use std::time::Duration;

use keybundle_common::{Error, IdentityId};
use keybundle_crypto::DeviceSecret;
use keybundle_storage::MemoryStore;
use keybundle_vault::{
    BundleKeyManager, Capability, ClientConfig, Entry, EnvelopeParams, RetryConfig, Session,
    VaultClient,
};

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_envelope(EnvelopeParams {
            iterations: 100_000,
            rsa_bits: 2048,
        })
        .with_retry(RetryConfig::new(5).with_initial_delay(Duration::from_millis(1)))
}

async fn enroll(client: &VaultClient, name: &str) -> (IdentityId, DeviceSecret, Session) {
    let identity = IdentityId::new(name).unwrap();
    let secret = DeviceSecret::generate();
    client.register(&identity, b"typingcats", &secret).await.unwrap();
    let session = client.unlock(&identity, b"typingcats", &secret).await.unwrap();
    (identity, secret, session)
}

#[tokio::test]
async fn test_register_unlock_store_and_read() {
    let client = VaultClient::new(Arc::new(MemoryStore::new()), config()).unwrap();
    let (_, _, mut session) = enroll(&client, "alice").await;

    let bundle = client.create_bundle(&mut session, "Personal").await.unwrap();
    let key = client.open_bundle(&mut session, &bundle.id).await.unwrap();
    let entries = client.entries(&session, &bundle.id).await.unwrap();

    let metadata = entries.get_metadata(&key).await.unwrap();
    let entry = Entry::password("Mail", "alice@example.com", "hunter2");
    let put = entries.put_entry(&key, None, &entry, &metadata).await.unwrap();

    let listed = entries.list_entries(&key).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(entries.get_entry(&key, &listed[0]).await.unwrap(), entry);

    let updated = Entry::password("Mail", "alice@example.com", "correct horse");
    let second = entries
        .put_entry(&key, Some(&put.descriptor.id), &updated, &put.metadata)
        .await
        .unwrap();
    let current = entries.get_metadata(&key).await.unwrap();
    assert_eq!(current.entries.len(), 1);
    assert_eq!(current.entries[0].path, second.descriptor.path);
    assert_eq!(entries.get_entry(&key, &current.entries[0]).await.unwrap(), updated);
    assert!(matches!(
        entries.get_entry(&key, &put.descriptor).await,
        Err(Error::NotFound(_))
    ));

    assert_eq!(client.bundles(&session).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_secrets_are_indistinguishable() {
    let client = VaultClient::new(Arc::new(MemoryStore::new()), config()).unwrap();
    let identity = IdentityId::new("bob").unwrap();
    let secret = DeviceSecret::generate();
    client.register(&identity, b"typingcats", &secret).await.unwrap();

    let wrong_password = client.unlock(&identity, b"typingdogs", &secret).await;
    let wrong_secret = client
        .unlock(&identity, b"typingcats", &DeviceSecret::generate())
        .await;

    assert!(matches!(wrong_password, Err(Error::WrongCredentials)));
    assert!(matches!(wrong_secret, Err(Error::WrongCredentials)));
}

#[tokio::test]
async fn test_share_gives_member_the_same_key() {
    let client = VaultClient::new(Arc::new(MemoryStore::new()), config()).unwrap();
    let (_, _, mut owner) = enroll(&client, "owner").await;
    let (friend_id, _, mut friend) = enroll(&client, "friend").await;

    let bundle = client.create_bundle(&mut owner, "Team").await.unwrap();
    let owner_key = client.open_bundle(&mut owner, &bundle.id).await.unwrap();

    // Not shared yet.
    assert!(matches!(
        client.open_bundle(&mut friend, &bundle.id).await,
        Err(Error::NoAccess(_))
    ));

    let shared = client
        .share_bundle(&mut owner, &bundle.id, &friend_id, &Capability::READ_ONLY, false)
        .await
        .unwrap();
    assert!(shared.member(&friend_id).is_some());

    let grant = client
        .keys()
        .fetch_grant(&bundle.id, &friend_id)
        .await
        .unwrap()
        .unwrap();
    let unwrapped = BundleKeyManager::unwrap(&grant, friend.private_key().unwrap()).unwrap();
    assert_eq!(unwrapped.as_bytes(), owner_key.as_bytes());

    let friend_key = client.open_bundle(&mut friend, &bundle.id).await.unwrap();
    assert_eq!(friend_key, owner_key);
    assert_eq!(client.bundles(&friend).await.unwrap().len(), 1);

    // Read-only: the owner's entry is visible but cannot be changed.
    let owner_entries = client.entries(&owner, &bundle.id).await.unwrap();
    let base = owner_entries.get_metadata(&owner_key).await.unwrap();
    let put = owner_entries
        .put_entry(&owner_key, None, &Entry::password("Db", "root", "s3cret"), &base)
        .await
        .unwrap();

    let friend_entries = client.entries(&friend, &bundle.id).await.unwrap();
    let listed = friend_entries.list_entries(&friend_key).await.unwrap();
    assert_eq!(friend_entries.get_entry(&friend_key, &listed[0]).await.unwrap().name, "Db");
    assert!(matches!(
        friend_entries
            .put_entry(&friend_key, None, &Entry::password("Mine", "me", "pw"), &put.metadata)
            .await,
        Err(Error::NoAccess(_))
    ));
    assert!(matches!(
        friend_entries.delete_entry(&friend_key, &put.descriptor.id).await,
        Err(Error::NoAccess(_))
    ));
    assert_eq!(owner_entries.list_entries(&owner_key).await.unwrap().len(), 1);

    // A read-only member cannot share further.
    let (third_id, _, _) = enroll(&client, "third").await;
    assert!(matches!(
        client
            .share_bundle(&mut friend, &bundle.id, &third_id, &Capability::ALL, false)
            .await,
        Err(Error::NoAccess(_))
    ));

    // Sharing again only updates the membership.
    let reshared = client
        .share_bundle(&mut owner, &bundle.id, &friend_id, &Capability::ALL, true)
        .await
        .unwrap();
    assert!(reshared.member(&friend_id).unwrap().is_admin);
    assert_eq!(reshared.members.len(), 1);

    // Wider capabilities apply to stores fetched after the reshare.
    let friend_entries = client.entries(&friend, &bundle.id).await.unwrap();
    friend_entries.delete_entry(&friend_key, &put.descriptor.id).await.unwrap();

    // Strangers get no entry store at all.
    let (_, _, stranger) = enroll(&client, "stranger").await;
    assert!(matches!(
        client.entries(&stranger, &bundle.id).await,
        Err(Error::NoAccess(_))
    ));
}

#[tokio::test]
async fn test_concurrent_writers_keep_both_entries() {
    let store = Arc::new(MemoryStore::new());
    let client_a = VaultClient::new(store.clone(), config()).unwrap();
    let client_b = VaultClient::new(store.clone(), config()).unwrap();
    let (_, _, mut session) = enroll(&client_a, "alice").await;

    let bundle = client_a.create_bundle(&mut session, "Shared").await.unwrap();
    let key = client_a.open_bundle(&mut session, &bundle.id).await.unwrap();

    let entries_a = client_a.entries(&session, &bundle.id).await.unwrap();
    let entries_b = client_b.entries(&session, &bundle.id).await.unwrap();
    let base = entries_a.get_metadata(&key).await.unwrap();

    let first = Entry::password("First", "a", "1");
    let second = Entry::password("Second", "b", "2");

    // Both start from the same version: one of them must lose the race.
    let (once_a, once_b) = futures::join!(
        entries_a.put_entry_once(&key, None, &first, &base),
        entries_b.put_entry_once(&key, None, &second, &base),
    );
    assert!(once_a.is_ok() != once_b.is_ok());
    let lost = if once_a.is_err() { once_a } else { once_b };
    assert!(lost.unwrap_err().is_conflict());

    // With retries, both writers land on top of each other.
    let (a, b) = futures::join!(
        entries_a.put_entry(&key, None, &first, &base),
        entries_b.put_entry(&key, None, &second, &base),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let metadata = entries_a.get_metadata(&key).await.unwrap();
    assert_eq!(metadata.entries.len(), 3);
    assert!(metadata.find(&a.descriptor.id).is_some());
    assert!(metadata.find(&b.descriptor.id).is_some());
    assert_eq!(metadata.version, a.metadata.version.max(b.metadata.version));
}

#[tokio::test]
async fn test_delete_and_missing_ids() {
    let client = VaultClient::new(Arc::new(MemoryStore::new()), config()).unwrap();
    let (_, _, mut session) = enroll(&client, "alice").await;
    let bundle = client.create_bundle(&mut session, "Personal").await.unwrap();
    let key = client.open_bundle(&mut session, &bundle.id).await.unwrap();
    let entries = client.entries(&session, &bundle.id).await.unwrap();

    let base = entries.get_metadata(&key).await.unwrap();
    let put = entries
        .put_entry(&key, None, &Entry::password("Old", "u", "p"), &base)
        .await
        .unwrap();

    let deleted = entries.delete_entry(&key, &put.descriptor.id).await.unwrap();
    assert!(deleted.removed.is_some());
    assert!(entries.list_entries(&key).await.unwrap().is_empty());

    let version = deleted.metadata.version;
    let again = entries.delete_entry(&key, &put.descriptor.id).await.unwrap();
    assert!(again.removed.is_none());
    assert_eq!(again.metadata.version, version);
}

#[tokio::test]
async fn test_locked_session_cannot_open_bundles() {
    let client = VaultClient::new(Arc::new(MemoryStore::new()), config()).unwrap();
    let (_, _, mut session) = enroll(&client, "alice").await;
    let bundle = client.create_bundle(&mut session, "Personal").await.unwrap();

    session.lock();

    assert!(matches!(
        client.open_bundle(&mut session, &bundle.id).await,
        Err(Error::NoAccess(_))
    ));
}
