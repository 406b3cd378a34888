// src/session_key.rs
// Session-key minting, lookup, and ownership (spec §3 `SessionKey`, §4.3,
// §6 `SessionKeyStore` collaborator interface, §8 invariant 7).
//
// Grounded on the teacher's `file_transfer.rs` (an id-keyed
// `RwLock<HashMap<...>>` store with a generated id) and `db.rs`'s
// `generate_id()`/`now()` helpers for the id-allocation-plus-bookkeeping shape.

use crate::crypto::{Crypto, SymmetricKeyCryptoSpec};
use crate::error::AuthError;
use crate::policy::CommunicationPolicy;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Number of low bits of a session-key id reserved for the minting Auth's
/// per-process counter; the remaining high bits hold the Auth id itself
/// (spec §9 "encode the minting-Auth id in a fixed bit range documented in
/// one place"). 48 low bits leaves 16 high bits for the Auth id.
const COUNTER_BITS: u32 = 48;
const COUNTER_MASK: u64 = (1u64 << COUNTER_BITS) - 1;

/// Packs `auth_id` into the high bits and `counter` into the low bits of a
/// 64-bit session-key id.
pub fn encode_session_key_id(auth_id: i32, counter: u64) -> i64 {
    let auth_bits = (auth_id as u32 as u64) << COUNTER_BITS;
    (auth_bits | (counter & COUNTER_MASK)) as i64
}

/// `decodeAuthIDFromSessionKeyID` (spec §3/§8 invariant 7).
pub fn decode_auth_id_from_session_key_id(id: i64) -> i32 {
    ((id as u64) >> COUNTER_BITS) as u32 as i32
}

/// `{ id, owners, value, cryptoSpec, absValidity, relValidity }` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub id: i64,
    pub owners: HashSet<String>,
    pub value: Vec<u8>,
    pub crypto_spec: SymmetricKeyCryptoSpec,
    /// Unix seconds the key expires at.
    pub abs_validity: i64,
    /// Seconds of validity from mint time.
    pub rel_validity: i64,
}

/// `generate`, `getById`, `addOwner` (spec §6). Ownership mutation is
/// idempotent and append-only (spec §3 invariant); id allocation is
/// synchronized so ids are unique (spec §5).
#[async_trait]
pub trait SessionKeyStore: Send + Sync {
    /// Mints `n` fresh keys for `owner`, further capped by
    /// `policy.max_num_session_key_owners` (spec §4.3) — callers are
    /// expected to have already applied the entity's own
    /// `max_session_keys_per_request` cap to `n` before calling this.
    async fn generate(
        &self,
        owner: &str,
        n: i32,
        policy: &CommunicationPolicy,
        crypto: &dyn Crypto,
        local_auth_id: i32,
        now: i64,
    ) -> Result<Vec<SessionKey>, AuthError>;

    async fn get_by_id(&self, id: i64) -> Option<SessionKey>;

    async fn add_owner(&self, id: i64, entity_name: &str) -> Result<(), AuthError>;
}

/// In-memory reference `SessionKeyStore`. A real deployment persists keys
/// via the external repository (spec §1 Non-goals); this is what the
/// handler's own tests run against.
pub struct InMemorySessionKeyStore {
    counter: AtomicU64,
    keys: Mutex<HashMap<i64, SessionKey>>,
}

impl InMemorySessionKeyStore {
    pub fn new() -> Self {
        InMemorySessionKeyStore { counter: AtomicU64::new(0), keys: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemorySessionKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionKeyStore for InMemorySessionKeyStore {
    async fn generate(
        &self,
        owner: &str,
        n: i32,
        policy: &CommunicationPolicy,
        crypto: &dyn Crypto,
        local_auth_id: i32,
        now: i64,
    ) -> Result<Vec<SessionKey>, AuthError> {
        // Never return more keys than requested (spec §8 invariant 6).
        let count = n.min(policy.max_num_session_key_owners).max(0) as usize;
        let mut generated = Vec::with_capacity(count);

        for _ in 0..count {
            let counter = self.counter.fetch_add(1, Ordering::Relaxed);
            let id = encode_session_key_id(local_auth_id, counter);
            let value = crypto.random_bytes(policy.key_bits / 8);
            let key = SessionKey {
                id,
                owners: HashSet::from([owner.to_string()]),
                value,
                crypto_spec: policy.crypto_spec,
                abs_validity: now + policy.abs_validity_secs,
                rel_validity: policy.rel_validity_secs,
            };
            self.keys.lock().unwrap().insert(id, key.clone());
            generated.push(key);
        }

        Ok(generated)
    }

    async fn get_by_id(&self, id: i64) -> Option<SessionKey> {
        self.keys.lock().unwrap().get(&id).cloned()
    }

    async fn add_owner(&self, id: i64, entity_name: &str) -> Result<(), AuthError> {
        let mut keys = self.keys.lock().unwrap();
        match keys.get_mut(&id) {
            Some(key) => {
                key.owners.insert(entity_name.to_string());
                Ok(())
            }
            None => Err(AuthError::PolicyMissing),
        }
    }
}
