// src/error.rs
// Typed errors for the connection-handling core.

use thiserror::Error;

/// Errors from the wire codec (spec §4.1 / §7 `DecodeError`).
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of buffer, needed {needed} more byte(s)")]
    UnexpectedEof { needed: usize },
    #[error("variable-length integer overflowed 64 bits")]
    VarintOverflow,
    #[error("invalid UTF-8 in BufferedString")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unknown message type tag {0:#04x}")]
    UnknownMessageType(u8),
    #[error("malformed purpose JSON: {0}")]
    InvalidPurpose(String),
}

/// Errors from the crypto facade (spec §4.2).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA operation failed: {0}")]
    Rsa(String),
    #[error("AES-CBC padding invalid")]
    BadPadding,
    #[error("key material had the wrong length: expected {expected}, got {actual}")]
    BadKeyLength { expected: usize, actual: usize },
}

/// Top-level error for the protocol state machine (spec §7).
#[derive(Debug, Error)]
pub enum AuthError {
    /// `entityName` in the request does not match any registered entity.
    #[error("unknown entity")]
    UnknownEntity,
    /// RSA signature over the PUB-ENC ciphertext did not verify.
    #[error("signature invalid")]
    SignatureInvalid,
    /// The DIST-KEY envelope's trailing MAC did not match the recomputed hash.
    #[error("MAC invalid")]
    MacInvalid,
    /// The request's echoed `authNonce` did not match the one this handler issued.
    #[error("nonce mismatch")]
    NonceMismatch,
    /// The entity's distribution key is missing or expired.
    #[error("invalid distribution key")]
    InvalidDistributionKey,
    /// No communication policy matches the requested (group, target).
    #[error("no matching communication policy")]
    PolicyMissing,
    /// The federated HTTPS fetch of a remotely-minted session key failed.
    #[error("federation fetch failed: {0}")]
    FederationFailure(String),
    /// No complete request arrived before the connection deadline.
    #[error("read timed out")]
    Timeout,
    /// The inbound message could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(#[from] WireError),
    /// A cryptographic primitive failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// The underlying socket failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Whether this error should be reported to the peer as an `AUTH_ALERT`
    /// rather than a silent close (spec §7).
    pub fn alert_code(&self) -> Option<crate::wire::AlertCode> {
        match self {
            AuthError::UnknownEntity => Some(crate::wire::AlertCode::UnknownEntity),
            AuthError::InvalidDistributionKey => Some(crate::wire::AlertCode::InvalidDistributionKey),
            _ => None,
        }
    }
}
