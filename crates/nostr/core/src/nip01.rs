//! NIP-01: events, canonical serialization and signatures.
//!
//! An event id is the sha256 of `[0, pubkey, created_at, kind, tags, content]`
//! serialized as compact JSON. Two events with identical fields therefore share
//! an id, which is what job intake uses as its dedup key.
//!
//! Hashing, key handling and Schnorr signing require the `full` feature.

#[cfg(feature = "full")]
use bitcoin::hashes::{Hash, sha256};
#[cfg(feature = "full")]
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
#[cfg(feature = "full")]
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded x-only public key of the author
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-bytes lowercase hex Schnorr signature over `id`
    pub sig: String,
}

impl Event {
    /// First tag whose name is `name`.
    pub fn tag(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|tag| tag.first().is_some_and(|n| n == name))
            .map(Vec::as_slice)
    }

    /// Value (second element) of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tag(name).and_then(|tag| tag.get(1)).map(String::as_str)
    }

    /// All tags named `name`, in event order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().is_some_and(|n| n == name))
            .map(Vec::as_slice)
    }

    /// The fields covered by the id hash.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Short id prefix for log lines.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// An event before its id and signature exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A template for creating events. The pubkey comes from the signing key.
///
/// ```
/// use nostr::EventTemplate;
///
/// let template = EventTemplate::new(5700, "")
///     .with_tag(vec!["param".to_string(), "style".to_string(), "detailed".to_string()]);
/// assert_eq!(template.tags.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time and no tags.
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn with_tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Seconds since the unix epoch, saturating to zero on a clock before 1970.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Structural checks on a signed event (hex lengths only, no crypto).
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

/// Hash of the canonical serialization, hex encoded.
#[cfg(feature = "full")]
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.to_byte_array()))
}

/// Generate a random secret key that is valid on secp256k1.
#[cfg(feature = "full")]
pub fn generate_secret_key() -> [u8; 32] {
    let mut rng = rand::rng();
    loop {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        if SecretKey::from_slice(&key).is_ok() {
            return key;
        }
    }
}

/// X-only public key for `secret_key`, hex encoded.
#[cfg(feature = "full")]
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidSecretKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Sign a template, producing a complete event.
#[cfg(feature = "full")]
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidSecretKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent {
        pubkey: hex::encode(xonly.serialize()),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };

    let serialized = serialize_event(&unsigned)?;
    let digest = sha256::Hash::hash(serialized.as_bytes()).to_byte_array();
    let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &keypair);

    Ok(Event {
        id: hex::encode(digest),
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Recompute the id and check the signature against the claimed pubkey.
///
/// Returns `false` for any event that is malformed, whose id does not match
/// its fields, or whose signature does not verify.
#[cfg(feature = "full")]
pub fn verify_event(event: &Event) -> bool {
    if !validate_event(event) {
        return false;
    }

    let Ok(computed_id) = get_event_hash(&event.unsigned()) else {
        return false;
    };
    if computed_id != event.id {
        return false;
    }

    let (Ok(id_bytes), Ok(sig_bytes), Ok(pubkey_bytes)) = (
        hex::decode(&event.id),
        hex::decode(&event.sig),
        hex::decode(&event.pubkey),
    ) else {
        return false;
    };
    let (Ok(message), Ok(sig), Ok(pubkey)) = (
        Message::from_digest_slice(&id_bytes),
        schnorr::Signature::from_slice(&sig_bytes),
        XOnlyPublicKey::from_slice(&pubkey_bytes),
    ) else {
        return false;
    };

    Secp256k1::verification_only()
        .verify_schnorr(&sig, &message, &pubkey)
        .is_ok()
}

/// A signing identity.
#[cfg(feature = "full")]
#[derive(Clone)]
pub struct Keys {
    secret_key: [u8; 32],
    public_key: String,
}

#[cfg(feature = "full")]
impl Keys {
    /// Fresh random identity.
    pub fn generate() -> Self {
        let secret_key = generate_secret_key();
        // A key accepted by generate_secret_key always has a public key.
        let public_key = get_public_key_hex(&secret_key).unwrap_or_default();
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_key(secret_key: [u8; 32]) -> Result<Self, Nip01Error> {
        let public_key = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Parse a 64-character hex secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, Nip01Error> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|e| Nip01Error::InvalidHex(e.to_string()))?;
        let secret_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Nip01Error::InvalidSecretKey("expected 32 bytes".to_string()))?;
        Self::from_secret_key(secret_key)
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn sign(&self, template: &EventTemplate) -> Result<Event, Nip01Error> {
        finalize_event(template, &self.secret_key)
    }
}

#[cfg(feature = "full")]
impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
