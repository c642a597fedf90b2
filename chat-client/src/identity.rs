//! Identity registration and lookup.
//!
//! Registration stores a suffixed name, a profile image reference and a bio
//! in the identity registry. Lookups degrade instead of failing when the
//! provider throttles: an unreadable record is reported as unknown, an
//! unreadable flag as not registered.

use talk2me_chat_types::{
    Address, IdentityRecord, LedgerError, ReadCall, ReadValue, TransactionId, TxPurpose, WriteCall,
};
use tracing::{debug, info, warn};

use crate::content::inline_reference;
use crate::error::SessionError;
use crate::gateway::Ledger;
use crate::session::ChatSession;

/// What the identity registry says about an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStatus {
    /// Whether the account is registered.
    pub registered: bool,
    /// The record, when it could be read.
    pub record: Option<IdentityRecord>,
}

impl RegistrationStatus {
    fn unregistered() -> Self {
        Self {
            registered: false,
            record: None,
        }
    }
}

impl<L: Ledger + 'static> ChatSession<L> {
    /// Register the actor as `name` with a profile image and bio.
    ///
    /// The image goes to the content store when there is one; otherwise, or if
    /// the upload fails, it is embedded as a `data:` reference. Returns once
    /// the write is accepted.
    pub async fn register(
        &self,
        name: &str,
        image: &[u8],
        bio: &str,
    ) -> Result<TransactionId, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidRegistration("Name is required.".into()));
        }
        if image.is_empty() {
            return Err(SessionError::InvalidImage("Profile image is required.".into()));
        }
        let max = self.inner.config.registration.max_image_bytes;
        if image.len() > max {
            return Err(SessionError::InvalidImage(format!(
                "Profile image is {} bytes, the limit is {max}.",
                image.len()
            )));
        }

        let image_ref = self.image_reference(image).await;
        let full_name = format!("{name}{}", self.inner.config.registration.name_suffix);
        let actor = self.inner.actor;

        let call = WriteCall::Register {
            name: full_name.clone(),
            image_ref,
            bio: bio.to_string(),
        };
        let tx = self
            .serialized(
                TxPurpose::Register,
                actor.to_string(),
                self.inner.tracker.submit(TxPurpose::Register, call),
            )
            .await?;
        info!(%tx, %actor, name = %full_name, "Registration submitted");

        let session = self.clone();
        self.inner.tracker.on_confirmed(tx, move |_| {
            let cache = &session.inner.cache;
            cache.invalidate(&ReadCall::IsRegistered(actor).cache_key());
            cache.invalidate(&ReadCall::GetRecord(actor).cache_key());
            cache.invalidate(&ReadCall::ListRegisteredAddresses.cache_key());
        });
        self.track_failures(tx);
        Ok(tx)
    }

    async fn image_reference(&self, image: &[u8]) -> String {
        let Some(store) = &self.inner.content else {
            debug!(bytes = image.len(), "No content store, embedding image");
            return inline_reference(image);
        };
        match store.upload(image).await {
            Ok(reference) => reference,
            Err(error) => {
                warn!(%error, "Image upload failed, embedding image");
                inline_reference(image)
            }
        }
    }

    /// Whether `address` is registered, and its record if readable.
    pub async fn check_registration(
        &self,
        address: Address,
    ) -> Result<RegistrationStatus, SessionError> {
        let ttl = self.volatile_ttl();
        let flag = ReadCall::IsRegistered(address);
        let generation = self.inner.cache.generation();

        let registered = match self.read_cached(&flag, ttl).await {
            Ok(value) => value.into_bool()?,
            Err(LedgerError::NotConfigured(_)) => return Ok(RegistrationStatus::unregistered()),
            Err(LedgerError::RateLimited) => {
                warn!(%address, "Registration flag unreadable, assuming not registered");
                self.inner.cache.set_if_current(
                    generation,
                    flag.cache_key(),
                    ReadValue::Bool(false),
                    ttl,
                );
                false
            }
            Err(error) => return Err(error.into()),
        };
        if !registered {
            return Ok(RegistrationStatus::unregistered());
        }

        let record = match self.read_cached(&ReadCall::GetRecord(address), ttl).await {
            Ok(value) => Some(value.into_record()?),
            Err(LedgerError::RateLimited) => {
                warn!(%address, "Registered but record unreadable");
                None
            }
            Err(error) => return Err(error.into()),
        };
        Ok(RegistrationStatus {
            registered: true,
            record,
        })
    }

    /// Active identities, in registration order.
    pub async fn list_registered_users(&self) -> Result<Vec<IdentityRecord>, SessionError> {
        let ttl = self.volatile_ttl();
        let addresses = match self
            .read_cached(&ReadCall::ListRegisteredAddresses, ttl)
            .await
        {
            Ok(value) => value.into_addresses()?,
            Err(LedgerError::NotConfigured(_)) => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut users = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.read_cached(&ReadCall::GetRecord(address), ttl).await {
                Ok(value) => match value.into_record() {
                    Ok(record) if record.is_active => users.push(record),
                    Ok(_) => {}
                    Err(error) => debug!(%address, %error, "Skipping malformed record"),
                },
                Err(error) => debug!(%address, %error, "Skipping unreadable record"),
            }
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::content::{ContentError, MockContentStore};
    use crate::gateway::MockLedger;
    use std::sync::Arc;
    use std::time::Duration;
    use talk2me_chat_types::RpcFailure;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn alice() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn bob() -> Address {
        Address::from_low_u64_be(0xb0b)
    }

    fn png(len: usize) -> Vec<u8> {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(len, 0);
        bytes
    }

    fn with_store(ledger: &MockLedger, store: &MockContentStore) -> ChatSession<MockLedger> {
        ChatSession::with_content_store(
            SessionConfig::default(),
            alice(),
            ledger.clone(),
            Arc::new(store.clone()),
        )
    }

    // ===========================================
    // Registration
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn register_then_check_reports_suffixed_name() {
        let ledger = MockLedger::with_signer(alice());
        let store = MockContentStore::new();
        let session = with_store(&ledger, &store);
        let image = png(2 * 1024 * 1024);

        assert!(!session.check_registration(alice()).await.unwrap().registered);

        let tx = session.register("alice", &image, "hi there").await.unwrap();
        session.tracker().wait(tx).await;

        let status = session.check_registration(alice()).await.unwrap();
        assert!(status.registered);
        let record = status.record.unwrap();
        assert_eq!(record.ens_name, "alice.Talk2me");
        assert_eq!(record.bio, "hi there");
        assert!(record.profile_image_ref.starts_with("ipfs://"));
        assert_eq!(store.fetch(&record.profile_image_ref).unwrap(), image);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_falls_back_to_inline_image() {
        let ledger = MockLedger::with_signer(alice());
        let store = MockContentStore::new();
        store.fail_next_upload(ContentError::Unavailable("gateway down".into()));
        let session = with_store(&ledger, &store);

        let tx = session.register("alice", &png(64), "").await.unwrap();
        session.tracker().wait(tx).await;

        let record = ledger.record(alice()).unwrap();
        assert!(record.profile_image_ref.starts_with("data:image/png;base64,"));
    }

    #[tokio::test(start_paused = true)]
    async fn without_store_image_is_inline() {
        let ledger = MockLedger::with_signer(alice());
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let tx = session.register("  alice  ", &png(64), "").await.unwrap();
        session.tracker().wait(tx).await;

        let record = ledger.record(alice()).unwrap();
        assert_eq!(record.ens_name, "alice.Talk2me");
        assert!(record.profile_image_ref.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn registration_input_is_validated() {
        let ledger = MockLedger::with_signer(alice());
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        assert!(matches!(
            session.register("  ", &png(64), "").await,
            Err(SessionError::InvalidRegistration(_))
        ));
        assert!(matches!(
            session.register("alice", &[], "").await,
            Err(SessionError::InvalidImage(_))
        ));
        assert!(matches!(
            session.register("alice", &png(5 * 1024 * 1024 + 1), "").await,
            Err(SessionError::InvalidImage(_))
        ));
        assert_eq!(ledger.total_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_registration_reverts() {
        let ledger = MockLedger::with_signer(alice());
        ledger.seed_registration(alice(), "alice.Talk2me", "ipfs://x", "");
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let err = session.register("alice", &png(64), "").await.unwrap_err();
        assert!(matches!(err, SessionError::Ledger(LedgerError::Reverted(_))));
    }

    // ===========================================
    // Lookup
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn throttled_record_read_is_registered_unknown() {
        let ledger = MockLedger::with_signer(alice());
        ledger.seed_registration(bob(), "bob.Talk2me", "ipfs://b", "");
        ledger.fail_function("getRecord", 2, RpcFailure::with_code(429, "Too Many Requests"));
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let status = session.check_registration(bob()).await.unwrap();
        assert!(status.registered);
        assert!(status.record.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_flag_read_is_cached_as_unregistered() {
        let ledger = MockLedger::with_signer(alice());
        ledger.seed_registration(bob(), "bob.Talk2me", "ipfs://b", "");
        ledger.fail_function("isRegistered", 2, RpcFailure::new("429"));
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let status = session.check_registration(bob()).await.unwrap();
        assert_eq!(status, RegistrationStatus::unregistered());
        assert_eq!(ledger.read_count("isRegistered"), 2);

        session.check_registration(bob()).await.unwrap();
        assert_eq!(ledger.read_count("isRegistered"), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(session.check_registration(bob()).await.unwrap().registered);
        assert_eq!(ledger.read_count("isRegistered"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn directory_lists_active_users_only() {
        let ledger = MockLedger::with_signer(alice());
        let carol = Address::from_low_u64_be(0xca401);
        ledger.seed_registration(alice(), "alice.Talk2me", "ipfs://a", "");
        ledger.seed_registration(bob(), "bob.Talk2me", "ipfs://b", "");
        ledger.seed_registration(carol, "carol.Talk2me", "ipfs://c", "");
        ledger.deactivate(bob());
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let users = session.list_registered_users().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.ens_name.as_str()).collect();
        assert_eq!(names, vec!["alice.Talk2me", "carol.Talk2me"]);
    }

    #[tokio::test(start_paused = true)]
    async fn directory_skips_unreadable_records() {
        let ledger = MockLedger::with_signer(alice());
        ledger.seed_registration(alice(), "alice.Talk2me", "ipfs://a", "");
        ledger.seed_registration(bob(), "bob.Talk2me", "ipfs://b", "");
        ledger.fail_function("getRecord", 2, RpcFailure::new("Too Many Requests"));
        let session = ChatSession::new(SessionConfig::default(), alice(), ledger.clone());

        let users = session.list_registered_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].ens_name, "bob.Talk2me");
    }
}
