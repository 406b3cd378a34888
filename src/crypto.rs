// src/crypto.rs
// Crypto facade: RSA sign/verify, RSA PKCS#1v1.5 encrypt/decrypt, AES-CBC
// with a prepended IV, keyed-hash MAC, and CSPRNG byte generation (spec §4.2).
//
// Kept the teacher's `CryptoManager`-style shape (a facade struct exposing
// paired encrypt/decrypt plus a checksum helper) but swapped its X25519 +
// AES-GCM session crypto for the RSA + AES-CBC primitives the wire protocol
// requires.

use crate::error::CryptoError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256 as RsaSha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const AES_BLOCK_SIZE: usize = 16;

/// Block cipher side of a `SymmetricKeyCryptoSpec` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgo {
    Aes128Cbc,
    Aes256Cbc,
}

impl CipherAlgo {
    pub fn key_bits(self) -> usize {
        match self {
            CipherAlgo::Aes128Cbc => 128,
            CipherAlgo::Aes256Cbc => 256,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CipherAlgo::Aes128Cbc => "AES-128-CBC",
            CipherAlgo::Aes256Cbc => "AES-256-CBC",
        }
    }
}

/// Hash/MAC side of a `SymmetricKeyCryptoSpec` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
}

impl HashAlgo {
    fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha256 => "SHA256",
        }
    }
}

/// `{ cipherAlgo, cipherKeySize, hashAlgo }` (spec §3), canonical string form
/// `"CIPHER-HASH"`, e.g. `"AES-128-CBC-SHA256"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricKeyCryptoSpec {
    pub cipher: CipherAlgo,
    pub hash: HashAlgo,
}

impl SymmetricKeyCryptoSpec {
    pub fn cipher_key_bytes(&self) -> usize {
        self.cipher.key_bits() / 8
    }
}

impl fmt::Display for SymmetricKeyCryptoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cipher.name(), self.hash.name())
    }
}

impl FromStr for SymmetricKeyCryptoSpec {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cipher = if s.starts_with("AES-128-CBC") {
            CipherAlgo::Aes128Cbc
        } else if s.starts_with("AES-256-CBC") {
            CipherAlgo::Aes256Cbc
        } else {
            return Err(CryptoError::Rsa(format!("unrecognized crypto spec: {s}")));
        };
        let hash = if s.ends_with("SHA256") {
            HashAlgo::Sha256
        } else {
            return Err(CryptoError::Rsa(format!("unrecognized crypto spec: {s}")));
        };
        Ok(SymmetricKeyCryptoSpec { cipher, hash })
    }
}

/// Capability object for every cryptographic operation the handler needs.
/// Exposed as a trait (spec §9 "Crypto separation") so tests can substitute
/// a deterministic double instead of hitting real RSA/AES.
pub trait Crypto: Send + Sync {
    fn random_bytes(&self, n: usize) -> Vec<u8>;

    fn rsa_sign(&self, data: &[u8], priv_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError>;

    /// Returns whether `sig` is a valid RSA-PKCS1v15/SHA-256 signature over `data`.
    fn rsa_verify(&self, data: &[u8], sig: &[u8], pub_key: &RsaPublicKey) -> bool;

    fn rsa_encrypt(&self, data: &[u8], pub_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError>;

    fn rsa_decrypt(&self, data: &[u8], priv_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError>;

    /// `IV || CBC-ciphertext(PKCS#7-padded)` (spec §4.2).
    fn aes_encrypt(&self, data: &[u8], key: &[u8], spec: &SymmetricKeyCryptoSpec) -> Result<Vec<u8>, CryptoError>;

    /// Reads the leading `blockSize` bytes of `data` as the IV.
    fn aes_decrypt(&self, data: &[u8], key: &[u8], spec: &SymmetricKeyCryptoSpec) -> Result<Vec<u8>, CryptoError>;

    fn hash(&self, data: &[u8], algo: HashAlgo) -> Vec<u8>;

    fn hash_len(&self, algo: HashAlgo) -> usize {
        match algo {
            HashAlgo::Sha256 => 32,
        }
    }
}

/// Production `Crypto` implementation backed by RustCrypto's `rsa`/`aes`/
/// `cbc`/`hmac`/`sha2` crates.
#[derive(Default)]
pub struct RustCryptoFacade;

impl Crypto for RustCryptoFacade {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; n];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn rsa_sign(&self, data: &[u8], priv_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
        let signing_key = SigningKey::<RsaSha256>::new(priv_key.clone());
        let sig = signing_key.sign_with_rng(&mut OsRng, data);
        Ok(sig.to_vec())
    }

    fn rsa_verify(&self, data: &[u8], sig: &[u8], pub_key: &RsaPublicKey) -> bool {
        let verifying_key = VerifyingKey::<RsaSha256>::new(pub_key.clone());
        let Ok(signature) = Signature::try_from(sig) else {
            return false;
        };
        verifying_key.verify(data, &signature).is_ok()
    }

    fn rsa_encrypt(&self, data: &[u8], pub_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
        pub_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
            .map_err(|e| CryptoError::Rsa(e.to_string()))
    }

    fn rsa_decrypt(&self, data: &[u8], priv_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
        priv_key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|e| CryptoError::Rsa(e.to_string()))
    }

    fn aes_encrypt(&self, data: &[u8], key: &[u8], spec: &SymmetricKeyCryptoSpec) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);

        let padded_len = (data.len() / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE;
        let mut buf = vec![0u8; padded_len];
        buf[..data.len()].copy_from_slice(data);

        let ciphertext = match spec.cipher {
            CipherAlgo::Aes128Cbc => {
                let key: &[u8; 16] = key
                    .try_into()
                    .map_err(|_| CryptoError::BadKeyLength { expected: 16, actual: key.len() })?;
                Aes128CbcEnc::new(key.into(), (&iv).into())
                    .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
                    .map_err(|_| CryptoError::BadPadding)?
                    .to_vec()
            }
            CipherAlgo::Aes256Cbc => {
                let key: &[u8; 32] = key
                    .try_into()
                    .map_err(|_| CryptoError::BadKeyLength { expected: 32, actual: key.len() })?;
                Aes256CbcEnc::new(key.into(), (&iv).into())
                    .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
                    .map_err(|_| CryptoError::BadPadding)?
                    .to_vec()
            }
        };

        let mut out = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn aes_decrypt(&self, data: &[u8], key: &[u8], spec: &SymmetricKeyCryptoSpec) -> Result<Vec<u8>, CryptoError> {
        if data.len() < AES_BLOCK_SIZE {
            return Err(CryptoError::BadPadding);
        }
        let (iv, ciphertext) = data.split_at(AES_BLOCK_SIZE);
        let mut buf = ciphertext.to_vec();

        let plaintext = match spec.cipher {
            CipherAlgo::Aes128Cbc => {
                let key: &[u8; 16] = key
                    .try_into()
                    .map_err(|_| CryptoError::BadKeyLength { expected: 16, actual: key.len() })?;
                let iv: &[u8; 16] = iv.try_into().map_err(|_| CryptoError::BadPadding)?;
                Aes128CbcDec::new(key.into(), iv.into())
                    .decrypt_padded_mut::<Pkcs7>(&mut buf)
                    .map_err(|_| CryptoError::BadPadding)?
                    .to_vec()
            }
            CipherAlgo::Aes256Cbc => {
                let key: &[u8; 32] = key
                    .try_into()
                    .map_err(|_| CryptoError::BadKeyLength { expected: 32, actual: key.len() })?;
                let iv: &[u8; 16] = iv.try_into().map_err(|_| CryptoError::BadPadding)?;
                Aes256CbcDec::new(key.into(), iv.into())
                    .decrypt_padded_mut::<Pkcs7>(&mut buf)
                    .map_err(|_| CryptoError::BadPadding)?
                    .to_vec()
            }
        };

        Ok(plaintext)
    }

    fn hash(&self, data: &[u8], algo: HashAlgo) -> Vec<u8> {
        match algo {
            HashAlgo::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            }
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Keyed MAC helper, used by callers that want a real HMAC rather than the
/// plain-hash construction the DIST-KEY wire format specifies (spec §9
/// flags that construction as weaker than HMAC-then-encrypt; this function
/// exists for completeness/tests, the handler intentionally does not call
/// it on the wire path).
#[allow(dead_code)]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| CryptoError::Rsa(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SHA-256 checksum, generalized from the teacher's `generate_checksum`.
pub fn generate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    generate_checksum(data) == expected
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_spec() -> SymmetricKeyCryptoSpec {
        SymmetricKeyCryptoSpec { cipher: CipherAlgo::Aes128Cbc, hash: HashAlgo::Sha256 }
    }

    #[test]
    fn crypto_spec_display_and_parse_round_trip() {
        let spec = test_spec();
        let s = spec.to_string();
        assert_eq!(s, "AES-128-CBC-SHA256");
        let parsed: SymmetricKeyCryptoSpec = s.parse().unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn aes_cbc_round_trip() {
        let facade = RustCryptoFacade;
        let key = facade.random_bytes(16);
        let spec = test_spec();
        let plaintext = b"session key material, arbitrary length";
        let ciphertext = facade.aes_encrypt(plaintext, &key, &spec).unwrap();
        let decrypted = facade.aes_decrypt(&ciphertext, &key, &spec).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aes_cbc_bad_padding_is_detected() {
        let facade = RustCryptoFacade;
        let key = facade.random_bytes(16);
        let spec = test_spec();
        let mut ciphertext = facade.aes_encrypt(b"hello", &key, &spec).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(facade.aes_decrypt(&ciphertext, &key, &spec).is_err());
    }

    #[test]
    fn rsa_sign_verify_round_trip() {
        let facade = RustCryptoFacade;
        let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let data = b"ciphertext-to-sign";
        let sig = facade.rsa_sign(data, &priv_key).unwrap();
        assert_eq!(sig.len(), crate::wire::RSA_SIGNATURE_SIZE);
        assert!(facade.rsa_verify(data, &sig, &pub_key));
        assert!(!facade.rsa_verify(b"tampered", &sig, &pub_key));
    }

    #[test]
    fn rsa_encrypt_decrypt_round_trip() {
        let facade = RustCryptoFacade;
        let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let plaintext = b"a short distribution key payload";
        let ciphertext = facade.rsa_encrypt(plaintext, &pub_key).unwrap();
        let decrypted = facade.rsa_decrypt(&ciphertext, &priv_key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn checksum_detects_tampering() {
        let data = b"some file bytes";
        let sum = generate_checksum(data);
        assert!(verify_checksum(data, &sum));
        assert!(!verify_checksum(b"other bytes", &sum));
    }
}
