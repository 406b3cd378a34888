// src/wire.rs
// Byte-level wire codec: fixed-width ints, base-128 varints, length-prefixed
// strings, and the typed message envelope (spec §4.1).

use crate::error::WireError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size in bytes of both `authNonce` and `entityNonce`.
pub const AUTH_NONCE_SIZE: usize = 8;

/// RSA modulus size assumed by the PUB-ENC payload split (spec §4.2/§9):
/// a wire-level constant, not configurable per entity. 2048-bit keys only.
pub const RSA_SIGNATURE_SIZE: usize = 256;

/// One-byte type tag that begins every message (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    AuthHello,
    SessionKeyReqInPubEnc,
    SessionKeyReq,
    SessionKeyResp,
    AuthAlert,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::AuthHello => 1,
            MessageType::SessionKeyReqInPubEnc => 2,
            MessageType::SessionKeyReq => 3,
            MessageType::SessionKeyResp => 4,
            MessageType::AuthAlert => 5,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            1 => Ok(MessageType::AuthHello),
            2 => Ok(MessageType::SessionKeyReqInPubEnc),
            3 => Ok(MessageType::SessionKeyReq),
            4 => Ok(MessageType::SessionKeyResp),
            5 => Ok(MessageType::AuthAlert),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// Alert codes carried by `AUTH_ALERT` (spec §4.1, §7, §9).
///
/// The original leaves `UNKNOWN_ENTITY` without a defined code; this crate
/// resolves that Open Question by assigning one (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCode {
    UnknownEntity,
    InvalidDistributionKey,
}

impl AlertCode {
    pub fn code(self) -> u8 {
        match self {
            AlertCode::UnknownEntity => 1,
            AlertCode::InvalidDistributionKey => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, WireError> {
        match code {
            1 => Ok(AlertCode::UnknownEntity),
            2 => Ok(AlertCode::InvalidDistributionKey),
            other => Err(WireError::InvalidPurpose(format!("unknown alert code {other}"))),
        }
    }
}

/// A cursor-based reader over an in-memory payload buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.remaining() < n {
            Err(WireError::UnexpectedEof { needed: n - self.remaining() })
        } else {
            Ok(())
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// All bytes from the current position to the end of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Base-128 varint: 7 bits per byte, high bit = continuation.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value: u64 = 0;
        for shift in (0..70).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            if shift >= 63 {
                return Err(WireError::VarintOverflow);
            }
        }
        Err(WireError::VarintOverflow)
    }

    /// A `VariableLengthInt` length prefix followed by that many UTF-8 bytes.
    /// The returned `usize` is the number of bytes consumed (prefix + body),
    /// matching `BufferedString.length()` in spec §4.1.
    pub fn read_buffered_string(&mut self) -> Result<(String, usize), WireError> {
        let start = self.pos;
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len)?;
        let s = std::str::from_utf8(bytes)?.to_owned();
        Ok((s, self.pos - start))
    }
}

/// An append-only byte-buffer writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_varint(&mut self, mut v: u64) {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    pub fn write_buffered_string(&mut self, s: &str) {
        self.write_varint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// Wraps a payload in the 1-byte-tag + varint-length envelope (spec §4.1).
pub fn encode_envelope(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u8(msg_type.tag());
    w.write_varint(payload.len() as u64);
    w.write_bytes(payload);
    w.into_bytes()
}

/// Reads one framed message (tag, varint length, payload) off an async
/// stream. Transport concerns (timeouts, single-request-per-connection)
/// live in the handler; this only knows how to delimit one message.
pub async fn read_message<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<(MessageType, Vec<u8>), crate::error::AuthError> {
    let tag = stream.read_u8().await?;
    let msg_type = MessageType::from_tag(tag)?;
    let len = read_varint_async(stream).await?;
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((msg_type, payload))
}

async fn read_varint_async<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    for shift in (0..70).step_by(7) {
        let byte = stream
            .read_u8()
            .await
            .map_err(|_| WireError::UnexpectedEof { needed: 1 })?;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if shift >= 63 {
            return Err(WireError::VarintOverflow);
        }
    }
    Err(WireError::VarintOverflow)
}

/// `purposeJSON` carries exactly one discriminator field (spec §4.1/§4.6/§9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurposeWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<i64>,
}

/// Parsed, validated purpose — exactly one of the four kinds (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
    Group(String),
    PubTopic(String),
    SubTopic(String),
    KeyId(i64),
}

impl Purpose {
    pub fn parse_json(json: &str) -> Result<Self, WireError> {
        let wire: PurposeWire = serde_json::from_str(json)
            .map_err(|e| WireError::InvalidPurpose(e.to_string()))?;
        let present = [
            wire.group.is_some(),
            wire.pub_topic.is_some(),
            wire.sub_topic.is_some(),
            wire.key_id.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if present != 1 {
            return Err(WireError::InvalidPurpose(format!(
                "expected exactly one discriminator field, found {present}"
            )));
        }
        if let Some(g) = wire.group {
            Ok(Purpose::Group(g))
        } else if let Some(p) = wire.pub_topic {
            Ok(Purpose::PubTopic(p))
        } else if let Some(s) = wire.sub_topic {
            Ok(Purpose::SubTopic(s))
        } else {
            Ok(Purpose::KeyId(wire.key_id.unwrap()))
        }
    }

    pub fn to_json(&self) -> String {
        let wire = match self {
            Purpose::Group(g) => PurposeWire { group: Some(g.clone()), pub_topic: None, sub_topic: None, key_id: None },
            Purpose::PubTopic(p) => PurposeWire { group: None, pub_topic: Some(p.clone()), sub_topic: None, key_id: None },
            Purpose::SubTopic(s) => PurposeWire { group: None, pub_topic: None, sub_topic: Some(s.clone()), key_id: None },
            Purpose::KeyId(k) => PurposeWire { group: None, pub_topic: None, sub_topic: None, key_id: Some(*k) },
        };
        serde_json::to_string(&wire).expect("purpose JSON is always serializable")
    }
}

/// Plaintext `SessionKeyReq` payload (spec §4.1), post RSA/AES decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyReqPayload {
    pub entity_name: String,
    pub auth_nonce: [u8; AUTH_NONCE_SIZE],
    pub entity_nonce: [u8; AUTH_NONCE_SIZE],
    pub num_keys: i32,
    pub purpose: Purpose,
}

impl SessionKeyReqPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_buffered_string(&self.entity_name);
        w.write_bytes(&self.auth_nonce);
        w.write_bytes(&self.entity_nonce);
        w.write_i32(self.num_keys);
        w.write_buffered_string(&self.purpose.to_json());
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let (entity_name, _) = r.read_buffered_string()?;
        let auth_nonce = r.read_bytes(AUTH_NONCE_SIZE)?.try_into().unwrap();
        let entity_nonce = r.read_bytes(AUTH_NONCE_SIZE)?.try_into().unwrap();
        let num_keys = r.read_i32()?;
        let (purpose_json, _) = r.read_buffered_string()?;
        let purpose = Purpose::parse_json(&purpose_json)?;
        Ok(SessionKeyReqPayload { entity_name, auth_nonce, entity_nonce, num_keys, purpose })
    }
}

/// One `SessionKey` entry as it appears on the wire (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSessionKey {
    pub id: i64,
    pub abs_validity: i64,
    pub rel_validity: i64,
    pub key_bytes: Vec<u8>,
}

impl WireSessionKey {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_i64(self.abs_validity);
        w.write_i64(self.rel_validity);
        w.write_varint(self.key_bytes.len() as u64);
        w.write_bytes(&self.key_bytes);
    }

    fn decode(r: &mut Reader) -> Result<Self, WireError> {
        let id = r.read_i64()?;
        let abs_validity = r.read_i64()?;
        let rel_validity = r.read_i64()?;
        let len = r.read_varint()? as usize;
        let key_bytes = r.read_bytes(len)?.to_vec();
        Ok(WireSessionKey { id, abs_validity, rel_validity, key_bytes })
    }
}

/// Plaintext `SessionKeyResp` payload (spec §4.1), pre AES encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyRespPayload {
    pub entity_nonce: [u8; AUTH_NONCE_SIZE],
    pub crypto_spec: String,
    pub keys: Vec<WireSessionKey>,
}

impl SessionKeyRespPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&self.entity_nonce);
        w.write_buffered_string(&self.crypto_spec);
        w.write_varint(self.keys.len() as u64);
        for k in &self.keys {
            k.encode(&mut w);
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let entity_nonce = r.read_bytes(AUTH_NONCE_SIZE)?.try_into().unwrap();
        let (crypto_spec, _) = r.read_buffered_string()?;
        let n = r.read_varint()?;
        let mut keys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            keys.push(WireSessionKey::decode(&mut r)?);
        }
        Ok(SessionKeyRespPayload { entity_nonce, crypto_spec, keys })
    }
}

/// `AUTH_HELLO` payload: 4-byte Auth id, then `AUTH_NONCE_SIZE` random bytes.
pub struct AuthHelloPayload {
    pub auth_id: i32,
    pub auth_nonce: [u8; AUTH_NONCE_SIZE],
}

impl AuthHelloPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i32(self.auth_id);
        w.write_bytes(&self.auth_nonce);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let auth_id = r.read_i32()?;
        let auth_nonce = r.read_bytes(AUTH_NONCE_SIZE)?.try_into().unwrap();
        Ok(AuthHelloPayload { auth_id, auth_nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64, u64::MAX] {
            let mut w = Writer::new();
            w.write_varint(v);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_varint().unwrap(), v);
        }
    }

    #[test]
    fn buffered_string_round_trip() {
        let mut w = Writer::new();
        w.write_buffered_string("hello entity");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let (s, len) = r.read_buffered_string().unwrap();
        assert_eq!(s, "hello entity");
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn envelope_round_trip() {
        let payload = b"some-payload-bytes";
        let framed = encode_envelope(MessageType::AuthAlert, payload);
        assert_eq!(framed[0], MessageType::AuthAlert.tag());
        let mut r = Reader::new(&framed[1..]);
        let len = r.read_varint().unwrap() as usize;
        assert_eq!(len, payload.len());
        assert_eq!(r.read_bytes(len).unwrap(), payload);
    }

    #[test]
    fn purpose_requires_exactly_one_field() {
        assert!(Purpose::parse_json(r#"{"group":"G1"}"#).is_ok());
        assert!(Purpose::parse_json(r#"{}"#).is_err());
        assert!(Purpose::parse_json(r#"{"group":"G1","pubTopic":"T1"}"#).is_err());
    }

    #[test]
    fn purpose_key_id_round_trips() {
        let p = Purpose::KeyId(42);
        let json = p.to_json();
        assert_eq!(Purpose::parse_json(&json).unwrap(), p);
    }

    #[test]
    fn session_key_req_payload_round_trip() {
        let payload = SessionKeyReqPayload {
            entity_name: "E1".into(),
            auth_nonce: [1; 8],
            entity_nonce: [2; 8],
            num_keys: 3,
            purpose: Purpose::Group("G1".into()),
        };
        let bytes = payload.encode();
        let decoded = SessionKeyReqPayload::decode(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn session_key_resp_payload_round_trip() {
        let payload = SessionKeyRespPayload {
            entity_nonce: [7; 8],
            crypto_spec: "AES-128-CBC-SHA256".into(),
            keys: vec![WireSessionKey {
                id: 42,
                abs_validity: 1000,
                rel_validity: 500,
                key_bytes: vec![9, 9, 9, 9],
            }],
        };
        let bytes = payload.encode();
        let decoded = SessionKeyRespPayload::decode(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }
}
