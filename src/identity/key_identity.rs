use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPublicKey;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::crypto::{self, digest, public_key};
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::security_id;
use crate::xml::{self, XmlEvent};

/// Hash algorithms an identity can be expressed in. Only SHA-1 exists on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
}

impl HashAlgorithm {
    pub fn parse(name: &str) -> SecurityResult<Self> {
        match name.trim() {
            crypto::HASH_ALGORITHM_SHA1 => Ok(HashAlgorithm::Sha1),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => crypto::HASH_ALGORITHM_SHA1,
        }
    }

    fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => digest::SHA1_LEN,
        }
    }
}

/// Content-addressed identity of an RSA public key.
///
/// Two identities are equal iff their derived security IDs are equal; the ID
/// is computed from the raw hash bytes, so any encoding of the same hash
/// yields the same identity.
#[derive(Clone)]
pub struct Identity {
    hash_algorithm: HashAlgorithm,
    key_hash: Vec<u8>,
    key_hash_base64: String,
    id: String,
}

impl Identity {
    /// Identity of `key`, hashing its canonical `RSAKeyValue` description.
    pub fn from_key(key: &RsaPublicKey) -> Self {
        Self::from_key_xml(&public_key::public_key_xml(key))
    }

    /// Identity of an already rendered canonical key description.
    pub fn from_key_xml(key_xml: &str) -> Self {
        Self::build(HashAlgorithm::Sha1, digest::sha1(key_xml.as_bytes()).to_vec())
    }

    /// Rebuild an identity from a base64 hash, as carried in ACL subjects and owner lists.
    pub fn from_encoded(algorithm: &str, hash_base64: &str) -> SecurityResult<Self> {
        let algorithm = HashAlgorithm::parse(algorithm)?;
        let key_hash = public_key::decode_base64(hash_base64)?;
        Self::from_hash(algorithm, key_hash)
    }

    pub fn from_hash(algorithm: HashAlgorithm, key_hash: Vec<u8>) -> SecurityResult<Self> {
        if key_hash.len() != algorithm.digest_len() {
            return Err(SecurityError::InvalidEncoding(format!(
                "{} hash must be {} bytes, got {}",
                algorithm.as_str(),
                algorithm.digest_len(),
                key_hash.len()
            )));
        }
        Ok(Self::build(algorithm, key_hash))
    }

    fn build(hash_algorithm: HashAlgorithm, key_hash: Vec<u8>) -> Self {
        let key_hash_base64 = STANDARD.encode(&key_hash);
        let id = security_id::encode(&key_hash).unwrap_or_else(|| hex::encode(&key_hash));
        Identity {
            hash_algorithm,
            key_hash,
            key_hash_base64,
            id,
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn key_hash(&self) -> &[u8] {
        &self.key_hash
    }

    pub fn key_hash_base64(&self) -> &str {
        &self.key_hash_base64
    }

    /// Dashed base32 security ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `<hash><algorithm>SHA1</algorithm><value>..</value></hash>`
    pub fn to_xml(&self) -> String {
        format!(
            "<hash><algorithm>{}</algorithm><value>{}</value></hash>",
            self.hash_algorithm.as_str(),
            self.key_hash_base64
        )
    }

    /// Parse every `<hash>` element in `fragment`, in document order.
    pub fn parse_all(fragment: &str) -> SecurityResult<Vec<Identity>> {
        let mut identities = Vec::new();
        let mut algorithm: Option<String> = None;
        let mut value: Option<String> = None;

        xml::walk(fragment, |event| {
            match event {
                XmlEvent::Open { path, .. } if xml::path_ends_with(path, &["hash"]) => {
                    algorithm = None;
                    value = None;
                }
                XmlEvent::Text { path, text } => {
                    if xml::path_ends_with(path, &["hash", "algorithm"]) {
                        algorithm = Some(text);
                    } else if xml::path_ends_with(path, &["hash", "value"]) {
                        value = Some(text);
                    }
                }
                XmlEvent::Close { path, .. } if xml::path_ends_with(path, &["hash"]) => {
                    let (Some(alg), Some(val)) = (algorithm.take(), value.take()) else {
                        return Err(SecurityError::MalformedInput(
                            "hash requires algorithm and value".to_string(),
                        ));
                    };
                    identities.push(Identity::from_encoded(&alg, &val)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(identities)
    }

    /// Parse a fragment that must contain exactly one `<hash>` element.
    pub fn parse_xml(fragment: &str) -> SecurityResult<Identity> {
        let mut identities = Self::parse_all(fragment)?;
        if identities.len() != 1 {
            return Err(SecurityError::MalformedInput(format!(
                "expected one hash element, found {}",
                identities.len()
            )));
        }
        Ok(identities.remove(0))
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::public_key::test_keys;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_identity_is_stable_across_encodings(index in 0usize..3) {
            let key_pair = test_keys::key(index);
            let identity = Identity::from_key(key_pair.public_key());
            let hash = digest::sha1(key_pair.public_key_xml().as_bytes());

            let rebuilt =
                Identity::from_encoded("SHA1", &STANDARD.encode(hash)).expect("Should rebuild identity");
            let reparsed = public_key::parse_public_key_xml(key_pair.public_key_xml())
                .expect("Should parse own key");
            prop_assert_eq!(&identity, &rebuilt);
            prop_assert_eq!(identity.id(), rebuilt.id());
            prop_assert_eq!(identity.key_hash(), &hash[..]);
            prop_assert_eq!(&Identity::from_key(&reparsed), &identity);
            prop_assert_eq!(&Identity::from_key_xml(key_pair.public_key_xml()), &identity);
        }
    }

    #[test]
    fn test_encodings_normalize_to_same_id() {
        let identity = Identity::from_key_xml("<RSAKeyValue/>");
        let wrapped = identity
            .key_hash_base64()
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i == 10 { vec!['\n', ' ', c] } else { vec![c] })
            .collect::<String>();

        let rebuilt = Identity::from_encoded(" SHA1 ", &wrapped).expect("Should tolerate whitespace");
        assert_eq!(identity, rebuilt);
    }

    #[test]
    fn test_distinct_keys_have_distinct_ids() {
        let a = Identity::from_key(test_keys::key(0).public_key());
        let b = Identity::from_key(test_keys::key(1).public_key());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_malformed_encodings() {
        assert!(matches!(
            Identity::from_encoded("SHA1", "not*base64"),
            Err(SecurityError::InvalidEncoding(_))
        ));
        assert!(matches!(
            Identity::from_encoded("SHA1", "AAAA"),
            Err(SecurityError::InvalidEncoding(_))
        ));
        assert!(matches!(
            Identity::from_encoded("MD5", "AAAA"),
            Err(SecurityError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_xml_round_trip() {
        let identity = Identity::from_key_xml("<RSAKeyValue>x</RSAKeyValue>");
        let xml = identity.to_xml();
        assert!(xml.starts_with("<hash><algorithm>SHA1</algorithm><value>"));
        assert_eq!(Identity::parse_xml(&xml).expect("Should parse hash"), identity);
    }

    #[test]
    fn test_parse_all_preserves_order() {
        let a = Identity::from_key_xml("a");
        let b = Identity::from_key_xml("b");
        let owners = format!("<Owners>{}{}</Owners>", a.to_xml(), b.to_xml());

        assert_eq!(Identity::parse_all(&owners).expect("Should parse owners"), vec![a, b]);
        assert!(Identity::parse_xml(&owners).is_err());
        assert!(Identity::parse_all("<hash><algorithm>SHA1</algorithm></hash>").is_err());
    }
}
