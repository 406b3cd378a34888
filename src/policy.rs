// src/policy.rs
// Policy resolver (spec §4.3, §6 `PolicyStore` collaborator interface).

use crate::crypto::SymmetricKeyCryptoSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// `targetKind ∈ {GROUP, PUB_TOPIC, SUB_TOPIC}` (spec §3). `SESSION_KEY_ID`
/// is a dispatch-only kind (spec §4.6) and never appears in a policy lookup,
/// so it is not a variant here — see `wire::Purpose` for the full dispatch
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Group,
    PubTopic,
    SubTopic,
}

/// `{ requesterGroup, targetKind, targetName, cryptoSpec, keyBits,
/// absValidity, relValidity, maxNumSessionKeyOwners }` (spec §3).
#[derive(Debug, Clone)]
pub struct CommunicationPolicy {
    pub requester_group: String,
    pub target_kind: TargetKind,
    pub target_name: String,
    pub crypto_spec: SymmetricKeyCryptoSpec,
    pub key_bits: usize,
    /// Seconds from mint time after which a session key is absolutely
    /// expired, independent of renewal (spec §3 `absValidity`). Feeds
    /// `SessionKey.abs_validity`.
    pub abs_validity_secs: i64,
    /// Seconds a session key remains valid since its last use/renewal
    /// (spec §3 `relValidity`). Feeds `SessionKey.rel_validity`.
    pub rel_validity_secs: i64,
    pub max_num_session_key_owners: i32,
}

/// `resolvePolicy(requesterGroup, targetKind, targetName) ->
/// CommunicationPolicy | NotFound` (spec §4.3). `None` is the handler-level
/// `PolicyMissing` protocol error (spec §7).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_comm_policy(
        &self,
        requester_group: &str,
        target_kind: TargetKind,
        target_name: &str,
    ) -> Option<CommunicationPolicy>;
}

/// In-memory reference `PolicyStore`, keyed the way the teacher keys its
/// settings table in `db.rs` (composite-key lookup over a guarded map).
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<(String, TargetKind, String), CommunicationPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: CommunicationPolicy) {
        let key = (policy.requester_group.clone(), policy.target_kind, policy.target_name.clone());
        self.policies.write().unwrap().insert(key, policy);
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_comm_policy(
        &self,
        requester_group: &str,
        target_kind: TargetKind,
        target_name: &str,
    ) -> Option<CommunicationPolicy> {
        let key = (requester_group.to_string(), target_kind, target_name.to_string());
        self.policies.read().unwrap().get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherAlgo, HashAlgo};

    fn policy() -> CommunicationPolicy {
        CommunicationPolicy {
            requester_group: "G1".into(),
            target_kind: TargetKind::Group,
            target_name: "G1".into(),
            crypto_spec: SymmetricKeyCryptoSpec { cipher: CipherAlgo::Aes128Cbc, hash: HashAlgo::Sha256 },
            key_bits: 128,
            abs_validity_secs: 86_400,
            rel_validity_secs: 3600,
            max_num_session_key_owners: 5,
        }
    }

    #[tokio::test]
    async fn resolves_matching_policy() {
        let store = InMemoryPolicyStore::new();
        store.insert(policy());
        let resolved = store.get_comm_policy("G1", TargetKind::Group, "G1").await;
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn missing_policy_is_none() {
        let store = InMemoryPolicyStore::new();
        let resolved = store.get_comm_policy("G1", TargetKind::PubTopic, "T1").await;
        assert!(resolved.is_none());
    }
}
