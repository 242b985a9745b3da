//! DNSSEC key material as exchanged with a parent registry
//!
//! The registry-facing model is deliberately small: a `KeyRecord` is one
//! DNSKEY as the signer publishes it, a `DsRecord` is the digest the parent
//! actually delegates to, and a `KeySet` is the per-zone collection both
//! sides of a synchronization are compared over. Equality is structural
//! (flags, protocol, algorithm, key bytes) so that records survive a round
//! trip through any wire encoding unchanged.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

/// Secure entry point bit in DNSKEY flags (RFC 4034)
pub const FLAG_SEP: u16 = 0x0001;

/// Zone-key bit in DNSKEY flags
pub const FLAG_ZONE_KEY: u16 = 0x0100;

#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("Empty zone name")]
    EmptyZoneName,
    #[error("Invalid zone label: {0}")]
    InvalidLabel(String),
    #[error("Zone name too long: {0} bytes in wire form")]
    NameTooLong(usize),
    #[error("Invalid base64 key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("Unsupported DS digest type: {0}")]
    UnsupportedDigestType(u8),
}

/// A fully-qualified zone name, normalized so that `example.com` and
/// `example.com.` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneName {
    // lowercase labels, no root label
    labels: Vec<String>,
}

impl ZoneName {
    pub fn parse(name: &str) -> Result<Self, KeyError> {
        let trimmed = name.strip_suffix('.').unwrap_or(name);
        if trimmed.is_empty() {
            return Err(KeyError::EmptyZoneName);
        }
        let mut labels = Vec::new();
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(KeyError::InvalidLabel(label.to_string()));
            }
            labels.push(label.to_ascii_lowercase());
        }
        let zone = Self { labels };
        let wire_len = zone.to_wire().len();
        if wire_len > 255 {
            return Err(KeyError::NameTooLong(wire_len));
        }
        Ok(zone)
    }

    /// Registry-facing form: no trailing dot
    pub fn as_registry_str(&self) -> String {
        self.labels.join(".")
    }

    /// Canonical wire form (lowercase, with root label), as digested into a
    /// DS record (RFC 4034 section 5.1.4)
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
        for label in &self.labels {
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        wire
    }
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.labels.join("."))
    }
}

/// One DNSSEC public key, as published by the signer or reported by the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl KeyRecord {
    pub fn new(flags: u16, protocol: u8, algorithm: u8, public_key: Vec<u8>) -> Self {
        Self {
            flags,
            protocol,
            algorithm,
            public_key,
        }
    }

    /// Build a record from the textual DNSKEY presentation fields, with the
    /// key itself in base64 as it appears in zone files and EPP documents.
    pub fn from_presentation(
        flags: u16,
        protocol: u8,
        algorithm: u8,
        key_b64: &str,
    ) -> Result<Self, KeyError> {
        // Presentation form allows whitespace splits inside the base64 blob
        let compact: String = key_b64.split_whitespace().collect();
        let public_key = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?;
        Ok(Self::new(flags, protocol, algorithm, public_key))
    }

    /// Whether the secure-entry-point bit is set. Registries only carry SEP
    /// (key signing) keys; everything else stays local to the zone.
    pub fn is_sep(&self) -> bool {
        self.flags & FLAG_SEP != 0
    }

    pub fn public_key_b64(&self) -> String {
        BASE64.encode(&self.public_key)
    }

    /// DNSKEY RDATA in wire form: flags, protocol, algorithm, key bytes
    pub fn rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(4 + self.public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(self.protocol);
        rdata.push(self.algorithm);
        rdata.extend_from_slice(&self.public_key);
        rdata
    }

    /// Calculate the key tag (RFC 4034 Appendix B)
    pub fn key_tag(&self) -> u16 {
        // Algorithm 1 (RSAMD5) takes the low 16 bits of the modulus instead
        if self.algorithm == 1 {
            if self.public_key.len() >= 2 {
                return u16::from_be_bytes([
                    self.public_key[self.public_key.len() - 2],
                    self.public_key[self.public_key.len() - 1],
                ]);
            }
            return 0;
        }

        let rdata = self.rdata();
        let mut accumulator: u32 = 0;
        for (i, &byte) in rdata.iter().enumerate() {
            if i % 2 == 0 {
                accumulator += u32::from(byte) << 8;
            } else {
                accumulator += u32::from(byte);
            }
        }
        accumulator += accumulator >> 16;
        (accumulator & 0xFFFF) as u16
    }
}

/// DS digest type numbers accepted for derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DsDigestType {
    Sha1 = 1,
    Sha256 = 2,
    Sha384 = 4,
}

impl DsDigestType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sha1),
            2 => Some(Self::Sha256),
            4 => Some(Self::Sha384),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        use ring::digest;
        let alg = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
        };
        digest::digest(alg, data).as_ref().to_vec()
    }
}

/// A delegation-signer record derived from a DNSKEY. These are only ever
/// produced by [`DsRecord::from_key`] or parsed off a registry response,
/// never assembled field by field elsewhere in the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsRecord {
    /// Derive the DS for `key` at `zone` (RFC 4034 section 5.1.4): digest
    /// over the canonical owner name followed by the DNSKEY RDATA.
    pub fn from_key(zone: &ZoneName, key: &KeyRecord, digest_type: DsDigestType) -> Self {
        let mut buf = zone.to_wire();
        buf.extend_from_slice(&key.rdata());
        Self {
            key_tag: key.key_tag(),
            algorithm: key.algorithm,
            digest_type: digest_type.to_u8(),
            digest: digest_type.digest(&buf),
        }
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Display for DsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.key_tag,
            self.algorithm,
            self.digest_type,
            self.digest_hex()
        )
    }
}

/// Unordered collection of key records for one zone, deduplicated under
/// structural equality. Construction order never matters to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    records: Vec<KeyRecord>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless a structurally equal one is already present.
    /// Returns whether the set changed.
    pub fn insert(&mut self, record: KeyRecord) -> bool {
        if self.records.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, record: &KeyRecord) -> bool {
        self.records.contains(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    /// The subset with the SEP bit set, i.e. the records eligible for
    /// publication at the parent.
    pub fn sep_only(&self) -> KeySet {
        self.records
            .iter()
            .filter(|k| k.is_sep())
            .cloned()
            .collect()
    }

    pub fn records(&self) -> &[KeyRecord] {
        &self.records
    }
}

impl FromIterator<KeyRecord> for KeySet {
    fn from_iter<I: IntoIterator<Item = KeyRecord>>(iter: I) -> Self {
        let mut set = KeySet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl IntoIterator for KeySet {
    type Item = KeyRecord;
    type IntoIter = std::vec::IntoIter<KeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ksk(seed: u8) -> KeyRecord {
        KeyRecord::new(257, 3, 8, vec![seed; 16])
    }

    #[test]
    fn test_zone_name_normalization() {
        let bare = ZoneName::parse("Example.COM").unwrap();
        let dotted = ZoneName::parse("example.com.").unwrap();
        assert_eq!(bare, dotted);
        assert_eq!(bare.as_registry_str(), "example.com");
        assert_eq!(bare.to_string(), "example.com.");
    }

    #[test]
    fn test_zone_name_rejects_garbage() {
        assert!(ZoneName::parse("").is_err());
        assert!(ZoneName::parse(".").is_err());
        assert!(ZoneName::parse("a..b").is_err());
    }

    #[test]
    fn test_zone_wire_form() {
        let zone = ZoneName::parse("example.com").unwrap();
        let mut expected = vec![7u8];
        expected.extend_from_slice(b"example");
        expected.push(3);
        expected.extend_from_slice(b"com");
        expected.push(0);
        assert_eq!(zone.to_wire(), expected);
    }

    #[test]
    fn test_structural_equality() {
        let a = ksk(1);
        let b = KeyRecord::new(257, 3, 8, vec![1; 16]);
        assert_eq!(a, b);
        let c = KeyRecord::new(256, 3, 8, vec![1; 16]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sep_filter() {
        let mut set = KeySet::new();
        set.insert(KeyRecord::new(257, 3, 8, vec![1; 8]));
        set.insert(KeyRecord::new(256, 3, 8, vec![2; 8]));
        let sep = set.sep_only();
        assert_eq!(sep.len(), 1);
        assert!(sep.iter().all(|k| k.is_sep()));
    }

    #[test]
    fn test_keyset_dedup() {
        let mut set = KeySet::new();
        assert!(set.insert(ksk(1)));
        assert!(!set.insert(ksk(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_key_tag_rfc4034_vector() {
        // RFC 4034 Appendix B.5 test vector
        let public_key = hex::decode(
            "030101a80020a95566ba42e886bb804cda84e47ef56dbd7aec612615552cec906d3e9b72dc4f90d3fc09b8e9d0ff2ae8ee5ed8cd61d7622c39ee2d76a2153bc0ac8b9e254125c46e0a224507fb358d7f6b5d7a42f75e60b9748e7c0747e2447f4bd7d10ca24bb1498de34a504406bbeb3b041fe48d0ad2b1de5adadb87d0c8824e7cc4dc3e5b7f0b3e8ac72c3d3d8aa7251abcaad82ad5ececed8cd83825d19ffd95e93bca729fdd88901b20fc598fb6a0779ddfa95e3e42ca9d0a7739d3c4ad3a7a5a30b3c60a73a6f09fdb812746e0d69edfba06754465f2e1dd5e3802e6d05bd6148e38fd8ca1632b71f6559fe9b6e18d73c5a750e3e2f2f205972e7b28ae04ddae5e27915a08d217db5ce090c119d23f79fb",
        )
        .unwrap();
        let key = KeyRecord::new(0x0101, 3, 5, public_key);
        assert_eq!(key.key_tag(), 55495);
    }

    #[test]
    fn test_key_tag_rsamd5_special_case() {
        let key = KeyRecord::new(0x0101, 3, 1, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(key.key_tag(), 0x5678);
    }

    #[test]
    fn test_ds_derivation_deterministic() {
        let zone = ZoneName::parse("example.com.").unwrap();
        let key = ksk(7);
        let a = DsRecord::from_key(&zone, &key, DsDigestType::Sha256);
        let b = DsRecord::from_key(&zone, &key, DsDigestType::Sha256);
        assert_eq!(a, b);
        assert_eq!(a.digest_type, 2);
        assert_eq!(a.digest.len(), 32);
        assert_eq!(a.key_tag, key.key_tag());
    }

    #[test]
    fn test_presentation_roundtrip() {
        let key = ksk(3);
        let parsed =
            KeyRecord::from_presentation(257, 3, 8, &key.public_key_b64()).unwrap();
        assert_eq!(parsed, key);
    }
}
