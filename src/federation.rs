// src/federation.rs
// Inter-Auth HTTPS RPC: fetches a single session key, by id, from the peer
// Auth that originally minted it (spec §4.4, §6 `HttpsClient`, §9 Open
// Question on the vestigial form fields).
//
// The teacher declares `reqwest` as a dependency but never calls it (its
// federation-shaped surface — `commands.rs` peer interactions — goes over
// UDP/Tauri IPC instead); this module is the first real exercise of that
// dependency, built the way the teacher builds its other request/response
// managers: a struct wrapping a client, methods returning a typed `Result`.

use crate::registry::TrustedAuth;
use crate::session_key::SessionKey;
use crate::crypto::SymmetricKeyCryptoSpec;
use crate::error::AuthError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Generic authenticated HTTPS POST collaborator (spec §6): `post(url, form,
/// jsonBody, deadline) -> jsonBody`.
#[async_trait]
pub trait HttpsClient: Send + Sync {
    async fn post(
        &self,
        peer: &TrustedAuth,
        form_fields: &[(&str, &str)],
        json_body: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AuthError>;
}

/// `reqwest`-backed `HttpsClient` authenticating with the peer's client
/// certificate (spec §6 "Mutual TLS with client certificate").
pub struct ReqwestHttpsClient;

#[async_trait]
impl HttpsClient for ReqwestHttpsClient {
    async fn post(
        &self,
        peer: &TrustedAuth,
        form_fields: &[(&str, &str)],
        json_body: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AuthError> {
        let identity = reqwest::Identity::from_pem(&peer.tls_client_identity)
            .map_err(|e| AuthError::FederationFailure(format!("bad client identity: {e}")))?;
        let client = reqwest::Client::builder()
            .identity(identity)
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::FederationFailure(e.to_string()))?;

        let url = format!("https://{}:{}/", peer.host, peer.port);

        let mut form = reqwest::multipart::Form::new();
        for (k, v) in form_fields {
            form = form.text(k.to_string(), v.to_string());
        }
        let part = reqwest::multipart::Part::bytes(json_body.to_vec())
            .mime_str("application/json")
            .map_err(|e| AuthError::FederationFailure(e.to_string()))?;
        form = form.part("body", part);

        let response = client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AuthError::FederationFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::FederationFailure(format!(
                "peer auth {} returned HTTP {}",
                peer.id,
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AuthError::FederationFailure(e.to_string()))
    }
}

/// `AuthSessionKeyReqMessage` (spec §6).
#[derive(Debug, Serialize)]
struct SessionKeyReqMessage {
    #[serde(rename = "SessionKeyID")]
    session_key_id: i64,
    #[serde(rename = "RequestingEntityName")]
    requesting_entity_name: String,
    #[serde(rename = "RequestingEntityGroup")]
    requesting_entity_group: String,
}

/// `AuthSessionKeyRespMessage` (spec §6).
#[derive(Debug, Deserialize)]
struct SessionKeyRespMessage {
    id: i64,
    owner: String,
    #[allow(dead_code)]
    #[serde(rename = "maxOwners")]
    max_owners: i32,
    #[serde(rename = "cryptoSpec")]
    crypto_spec: String,
    #[serde(rename = "expirationTime")]
    expiration_time: i64,
    #[serde(rename = "relValidityPeriod")]
    rel_validity_period: i64,
    #[serde(rename = "keyVal")]
    key_val: String,
}

/// `fetchSessionKey(peerAuthId, sessionKeyId, requester) -> (SessionKey,
/// cryptoSpec) | Error` (spec §4.4). Kept separate from `HttpsClient` so the
/// generic transport and the federation-specific JSON shape can vary
/// independently, matching spec §6's own split between the two interfaces.
#[async_trait]
pub trait FederationClient: Send + Sync {
    async fn fetch_session_key(
        &self,
        peer: &TrustedAuth,
        session_key_id: i64,
        requester_name: &str,
        requester_group: &str,
    ) -> Result<(SessionKey, SymmetricKeyCryptoSpec), AuthError>;
}

/// Default `FederationClient`, built atop any `HttpsClient`.
pub struct HttpFederationClient<H: HttpsClient> {
    https: H,
    timeout: Duration,
    /// Whether to send the two vestigial form fields the original peer
    /// protocol expects alongside the JSON body (spec §9 Open Question,
    /// resolved in DESIGN.md: kept, gated by this flag).
    send_legacy_form_fields: bool,
}

impl<H: HttpsClient> HttpFederationClient<H> {
    pub fn new(https: H, timeout: Duration, send_legacy_form_fields: bool) -> Self {
        HttpFederationClient { https, timeout, send_legacy_form_fields }
    }
}

#[async_trait]
impl<H: HttpsClient> FederationClient for HttpFederationClient<H> {
    async fn fetch_session_key(
        &self,
        peer: &TrustedAuth,
        session_key_id: i64,
        requester_name: &str,
        requester_group: &str,
    ) -> Result<(SessionKey, SymmetricKeyCryptoSpec), AuthError> {
        let req = SessionKeyReqMessage {
            session_key_id,
            requesting_entity_name: requester_name.to_string(),
            requesting_entity_group: requester_group.to_string(),
        };
        let json_body = serde_json::to_vec(&req)
            .map_err(|e| AuthError::FederationFailure(e.to_string()))?;

        let form_fields: &[(&str, &str)] =
            if self.send_legacy_form_fields { &[("Name", "Robert"), ("Age", "32")] } else { &[] };

        let response_bytes = self.https.post(peer, form_fields, &json_body, self.timeout).await?;

        let resp: SessionKeyRespMessage = serde_json::from_slice(&response_bytes)
            .map_err(|e| AuthError::FederationFailure(format!("malformed peer response: {e}")))?;

        let crypto_spec = SymmetricKeyCryptoSpec::from_str(&resp.crypto_spec)
            .map_err(|e| AuthError::FederationFailure(format!("malformed crypto spec: {e}")))?;
        let key_bytes = BASE64
            .decode(&resp.key_val)
            .map_err(|e| AuthError::FederationFailure(format!("malformed key material: {e}")))?;

        let key = SessionKey {
            id: resp.id,
            owners: HashSet::from([resp.owner]),
            value: key_bytes,
            crypto_spec,
            abs_validity: resp.expiration_time,
            rel_validity: resp.rel_validity_period,
        };

        Ok((key, crypto_spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherAlgo, HashAlgo};
    use std::sync::Mutex;

    struct FakeHttpsClient {
        response: Vec<u8>,
        seen_form_fields: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl HttpsClient for FakeHttpsClient {
        async fn post(
            &self,
            _peer: &TrustedAuth,
            form_fields: &[(&str, &str)],
            _json_body: &[u8],
            _timeout: Duration,
        ) -> Result<Vec<u8>, AuthError> {
            *self.seen_form_fields.lock().unwrap() =
                form_fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            Ok(self.response.clone())
        }
    }

    fn peer() -> TrustedAuth {
        TrustedAuth { id: 7, host: "peer.example".into(), port: 9443, tls_client_identity: vec![] }
    }

    #[tokio::test]
    async fn fetch_session_key_parses_peer_response() {
        let body = serde_json::json!({
            "id": 42,
            "owner": "E2",
            "maxOwners": 5,
            "cryptoSpec": "AES-128-CBC-SHA256",
            "expirationTime": 1000,
            "relValidityPeriod": 500,
            "keyVal": BASE64.encode([1,2,3,4]),
        });
        let https = FakeHttpsClient {
            response: serde_json::to_vec(&body).unwrap(),
            seen_form_fields: Mutex::new(vec![]),
        };
        let client = HttpFederationClient::new(https, Duration::from_secs(1), true);

        let (key, spec) = client.fetch_session_key(&peer(), 42, "E1", "G1").await.unwrap();
        assert_eq!(key.id, 42);
        assert!(key.owners.contains("E2"));
        assert_eq!(key.value, vec![1, 2, 3, 4]);
        assert_eq!(spec, SymmetricKeyCryptoSpec { cipher: CipherAlgo::Aes128Cbc, hash: HashAlgo::Sha256 });
    }

    #[tokio::test]
    async fn legacy_form_fields_sent_when_enabled() {
        let body = serde_json::json!({
            "id": 1, "owner": "E2", "maxOwners": 1, "cryptoSpec": "AES-128-CBC-SHA256",
            "expirationTime": 1, "relValidityPeriod": 1, "keyVal": BASE64.encode([0]),
        });
        let https = FakeHttpsClient {
            response: serde_json::to_vec(&body).unwrap(),
            seen_form_fields: Mutex::new(vec![]),
        };
        let client = HttpFederationClient::new(https, Duration::from_secs(1), true);
        client.fetch_session_key(&peer(), 1, "E1", "G1").await.unwrap();
        let seen = client.https.seen_form_fields.lock().unwrap();
        assert_eq!(*seen, vec![("Name".to_string(), "Robert".to_string()), ("Age".to_string(), "32".to_string())]);
    }
}
