// src/config.rs
// Host-supplied knobs the handler needs by name (spec §4.5/§5, SPEC_FULL §2
// item 10). The core never loads these itself (spec §1 Non-goals: "the
// configuration/CLI loader" is out of scope) — a host binary builds a
// `HandlerConfig` from TOML/env/CLI and passes it in.
//
// Grounded on the teacher's settings shape (a flat, `serde`-deserializable
// struct with `Default`), generalized from its Tauri app-settings struct.

use crate::wire;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// This Auth's numeric id, encoded into the high bits of locally-minted
    /// session-key ids (spec §3/§8 invariant 7) and sent in `AUTH_HELLO`.
    pub local_auth_id: i32,
    /// Deadline, from accept, to receive one complete request (spec §4.5/§5).
    pub timeout_millis: u64,
    /// Deadline for the outbound federation HTTPS POST (spec §4.4/§5).
    pub federation_timeout_millis: u64,
    /// Whether to send the vestigial `Name=Robert`/`Age=32` form fields on
    /// the federation RPC (spec §9 Open Question, resolved in DESIGN.md).
    pub send_legacy_form_fields: bool,
    /// Byte length of the RSA signature appended to a PUB-ENC payload (spec
    /// §4.2), used to split the request payload from its trailing signature.
    /// Defaults to `wire::RSA_SIGNATURE_SIZE` (2048-bit keys); a host binary
    /// serving different key sizes overrides it rather than the core
    /// hardcoding one modulus size.
    pub rsa_signature_size: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            local_auth_id: 0,
            timeout_millis: 5_000,
            federation_timeout_millis: 3_000,
            send_legacy_form_fields: true,
            rsa_signature_size: wire::RSA_SIGNATURE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let cfg: HandlerConfig = serde_json::from_str(r#"{"local_auth_id": 7}"#).unwrap();
        assert_eq!(cfg.local_auth_id, 7);
        assert_eq!(cfg.timeout_millis, 5_000);
        assert!(cfg.send_legacy_form_fields);
    }
}
