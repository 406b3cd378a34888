// src/registry.rs
// Read-mostly snapshot of registered entities and trusted peer Auths
// (spec §3 `RegisteredEntity`/`DistributionKey`/`TrustedAuth`, §4.3 Registry
// view, §5 concurrency model, §6 `Registry` collaborator interface).
//
// Grounded on the teacher's `db.rs` (a `Mutex`-guarded store of plain data
// structs) and `discovery.rs` (an `Arc<RwLock<HashMap<...>>>` peer table)
// for the read-mostly-snapshot-plus-per-entry-mutation shape.

use crate::crypto::SymmetricKeyCryptoSpec;
use crate::error::AuthError;
use async_trait::async_trait;
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::sync::RwLock;

/// A minted, time-limited per-entity distribution key (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionKey {
    pub key_bytes: Vec<u8>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl DistributionKey {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Serialized form RSA-encrypted and sent to the entity (spec §4.5):
    /// `expiresAt:int64 || keyBytes`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.key_bytes.len());
        out.extend_from_slice(&self.expires_at.to_be_bytes());
        out.extend_from_slice(&self.key_bytes);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, AuthError> {
        if bytes.len() < 8 {
            return Err(AuthError::DecodeError(crate::error::WireError::UnexpectedEof {
                needed: 8 - bytes.len(),
            }));
        }
        let (head, tail) = bytes.split_at(8);
        let expires_at = i64::from_be_bytes(head.try_into().unwrap());
        Ok(DistributionKey { key_bytes: tail.to_vec(), expires_at })
    }
}

/// `{ name, group, publicKey, distCryptoSpec, distKeyValidity,
/// maxSessionKeysPerRequest, distributionKey }` (spec §3).
#[derive(Debug, Clone)]
pub struct RegisteredEntity {
    pub name: String,
    pub group: String,
    pub public_key: Option<RsaPublicKey>,
    pub dist_crypto_spec: SymmetricKeyCryptoSpec,
    /// Seconds a freshly minted distribution key remains valid.
    pub dist_key_validity_secs: i64,
    pub max_session_keys_per_request: i32,
    pub distribution_key: Option<DistributionKey>,
    /// If set, `distribution_key` is permanent and PUB-ENC must never
    /// rotate it (spec §3 invariant).
    pub use_permanent_dist_key: bool,
}

/// `{ id, host, port, tlsClientIdentity }` (spec §3). `tls_client_identity`
/// is PEM-encoded client certificate + key material for mutual TLS (spec §6).
#[derive(Debug, Clone)]
pub struct TrustedAuth {
    pub id: i32,
    pub host: String,
    pub port: u16,
    pub tls_client_identity: Vec<u8>,
}

/// External registry collaborator (spec §6): `getEntity`, `getPeerAuth`,
/// `updateDistributionKey`. Readers never see torn state (spec §5); writers
/// (outside this crate's scope) publish new snapshots atomically.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_entity(&self, name: &str) -> Option<RegisteredEntity>;
    async fn get_peer_auth(&self, id: i32) -> Option<TrustedAuth>;
    async fn update_distribution_key(&self, name: &str, key: DistributionKey) -> Result<(), AuthError>;
}

/// In-memory reference `Registry`. A real deployment backs this interface
/// with a relational store (spec §1 Non-goals); this implementation is what
/// the handler's own tests run against.
#[derive(Default)]
pub struct InMemoryRegistry {
    entities: RwLock<HashMap<String, RegisteredEntity>>,
    peers: RwLock<HashMap<i32, TrustedAuth>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&self, entity: RegisteredEntity) {
        self.entities.write().unwrap().insert(entity.name.clone(), entity);
    }

    pub fn insert_peer(&self, peer: TrustedAuth) {
        self.peers.write().unwrap().insert(peer.id, peer);
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get_entity(&self, name: &str) -> Option<RegisteredEntity> {
        self.entities.read().unwrap().get(name).cloned()
    }

    async fn get_peer_auth(&self, id: i32) -> Option<TrustedAuth> {
        self.peers.read().unwrap().get(&id).cloned()
    }

    async fn update_distribution_key(&self, name: &str, key: DistributionKey) -> Result<(), AuthError> {
        let mut entities = self.entities.write().unwrap();
        match entities.get_mut(name) {
            Some(entity) => {
                // Atomic replace: the last writer for a given entity wins
                // (spec §5); in-flight responses keep referencing the key
                // they already captured in their own stack frame.
                entity.distribution_key = Some(key);
                Ok(())
            }
            None => Err(AuthError::UnknownEntity),
        }
    }
}
