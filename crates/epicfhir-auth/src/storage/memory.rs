//! In-memory credential storage.
//!
//! Backs tests and single-instance deployments. Records live in a `DashMap`
//! keyed by internal id; every update replaces the whole record under the
//! shard lock, so a reader never observes a half-written session binding.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::credential::{CredentialStorage, NewCredential, SessionBinding, UserCredential};

/// Credential storage held in process memory.
#[derive(Debug)]
pub struct MemoryCredentialStorage {
    records: DashMap<i64, UserCredential>,
    next_id: AtomicI64,
}

impl MemoryCredentialStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Returns a snapshot of record `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<UserCredential> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn hash_taken(&self, hash: &str, except: Option<i64>) -> bool {
        self.records.iter().any(|r| {
            Some(*r.key()) != except && r.value().session_hash.as_deref() == Some(hash)
        })
    }
}

impl Default for MemoryCredentialStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStorage for MemoryCredentialStorage {
    async fn register(&self, credential: &NewCredential) -> AuthResult<i64> {
        if let Some(hash) = credential.session_hash.as_deref()
            && self.hash_taken(hash, None)
        {
            return Err(AuthError::storage("session hash already in use"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        self.records.insert(
            id,
            UserCredential {
                id,
                app_audience: credential.app_audience.clone(),
                user_id: credential.user_id.clone(),
                client_id: credential.client_id.clone(),
                np_client_id: credential.np_client_id.clone(),
                token: credential.token.clone(),
                date_registered: Some(now),
                session_hash: credential.session_hash.clone(),
                session_expiry: credential.session_expiry,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find_active_by_session_hash(
        &self,
        session_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<UserCredential>> {
        Ok(self
            .records
            .iter()
            .find(|r| {
                r.value().session_hash.as_deref() == Some(session_hash)
                    && r.value().is_session_active(now)
            })
            .map(|r| r.value().clone()))
    }

    async fn find_by_user_and_client(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserCredential>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().user_id == user_id && r.value().matches_client(client_id))
            .max_by_key(|r| (r.value().updated_at, r.value().id))
            .map(|r| r.value().clone()))
    }

    async fn update_session(&self, id: i64, binding: &SessionBinding) -> AuthResult<()> {
        if self.hash_taken(&binding.session_hash, Some(id)) {
            return Err(AuthError::storage("session hash already in use"));
        }

        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| AuthError::storage(format!("credential {id} not found")))?;
        record.token = Some(binding.token.clone());
        record.session_hash = Some(binding.session_hash.clone());
        record.session_expiry = Some(binding.session_expiry);
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}
