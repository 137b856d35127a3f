use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::crypto::digest;
use crate::errors::{SecurityError, SecurityResult};
use crate::security::secure_rng::SecureRngHandle;
use crate::xml::{self, XmlEvent};

/// Minimal big-endian two's-complement form: unsigned magnitude with a
/// leading zero byte when the top bit is set.
fn signed_magnitude(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes.first().map_or(false, |b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    bytes
}

/// `<RSAKeyValue><Modulus>..</Modulus><Exponent>..</Exponent></RSAKeyValue>`
///
/// This string is the canonical key encoding: identities hash it and the
/// ownership HMAC covers it, so its layout must stay byte-stable.
pub fn public_key_xml(key: &RsaPublicKey) -> String {
    format!(
        "<RSAKeyValue><Modulus>{}</Modulus><Exponent>{}</Exponent></RSAKeyValue>",
        STANDARD.encode(signed_magnitude(key.n())),
        STANDARD.encode(signed_magnitude(key.e()))
    )
}

/// Parse an `RSAKeyValue` element, possibly embedded in a larger fragment.
pub fn parse_public_key_xml(fragment: &str) -> SecurityResult<RsaPublicKey> {
    let mut modulus = None;
    let mut exponent = None;
    xml::walk(fragment, |event| {
        if let XmlEvent::Text { path, text } = event {
            if xml::path_ends_with(path, &["RSAKeyValue", "Modulus"]) {
                modulus = Some(decode_base64(&text)?);
            } else if xml::path_ends_with(path, &["RSAKeyValue", "Exponent"]) {
                exponent = Some(decode_base64(&text)?);
            }
        }
        Ok(())
    })?;

    match (modulus, exponent) {
        (Some(n), Some(e)) => Ok(RsaPublicKey::new(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&e),
        )?),
        _ => Err(SecurityError::MalformedInput(
            "RSAKeyValue requires Modulus and Exponent".to_string(),
        )),
    }
}

/// Tolerant base64 decoding: interior whitespace is ignored.
pub fn decode_base64(text: &str) -> SecurityResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> SecurityResult<Vec<u8>> {
    Ok(key.encrypt(&mut SecureRngHandle, Pkcs1v15Encrypt, data)?)
}

pub fn decrypt(key: &RsaPrivateKey, data: &[u8]) -> SecurityResult<Vec<u8>> {
    Ok(key.decrypt(Pkcs1v15Encrypt, data)?)
}

/// SHA1withRSA over the UTF-8 bytes of `text`.
pub fn sign(key: &RsaPrivateKey, text: &str) -> SecurityResult<Vec<u8>> {
    let hashed = digest::sha1(text.as_bytes());
    Ok(key.sign(Pkcs1v15Sign::new::<Sha1>(), &hashed)?)
}

pub fn verify(key: &RsaPublicKey, text: &str, signature: &[u8]) -> bool {
    let hashed = digest::sha1(text.as_bytes());
    key.verify(Pkcs1v15Sign::new::<Sha1>(), &hashed, signature).is_ok()
}

/// The device's (or a control point's) RSA key pair together with its
/// canonical public-key description.
#[derive(Clone)]
pub struct DeviceKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_xml: String,
}

impl DeviceKeyPair {
    pub fn generate(bits: usize) -> SecurityResult<Self> {
        let private_key = RsaPrivateKey::new(&mut SecureRngHandle, bits)?;
        Ok(Self::from_private_key(private_key))
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_xml = public_key_xml(&public_key);
        DeviceKeyPair {
            private_key,
            public_key,
            public_key_xml,
        }
    }

    /// Load a PKCS#8 PEM key from `path`, or generate one and write it there.
    pub fn load_or_generate<P: AsRef<Path>>(path: P, bits: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let pem = fs::read_to_string(path).context("Failed to read device key file")?;
            let private_key =
                RsaPrivateKey::from_pkcs8_pem(&pem).context("Failed to decode device key")?;
            info!(path = %path.display(), "Loaded device key pair");
            return Ok(Self::from_private_key(private_key));
        }

        let key_pair = Self::generate(bits)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create key directory")?;
        }
        let pem = key_pair
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("Failed to encode device key")?;
        fs::write(path, pem.as_bytes()).context("Failed to write device key file")?;
        info!(path = %path.display(), bits, "Generated new device key pair");
        Ok(key_pair)
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn public_key_xml(&self) -> &str {
        &self.public_key_xml
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public_key_xml", &self.public_key_xml)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_public_key_xml_round_trip() {
        let key_pair = test_keys::key(0);
        let xml = key_pair.public_key_xml();
        assert!(xml.starts_with("<RSAKeyValue><Modulus>"));

        let parsed = parse_public_key_xml(xml).expect("Should parse key XML");
        assert_eq!(&parsed, key_pair.public_key());
        assert_eq!(public_key_xml(&parsed), xml);
    }

    #[test]
    fn test_modulus_keeps_sign_byte() {
        let key_pair = test_keys::key(0);
        let xml = key_pair.public_key_xml();
        let modulus = xml::raw_inner(xml, "Modulus").expect("Should contain modulus");
        let bytes = decode_base64(modulus).expect("Should decode modulus");
        // 1024-bit moduli always have the top bit set
        assert_eq!(bytes.len(), 129);
        assert_eq!(bytes[0], 0);
        assert_eq!(xml::raw_inner(xml, "Exponent"), Some("AQAB"));
    }

    #[test]
    fn test_parse_rejects_incomplete_key() {
        assert!(parse_public_key_xml("<RSAKeyValue><Modulus>AQAB</Modulus></RSAKeyValue>").is_err());
        assert!(parse_public_key_xml("<RSAKeyValue><Modulus>!!</Modulus><Exponent>AQAB</Exponent></RSAKeyValue>").is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key_pair = test_keys::key(1);
        let ciphertext = encrypt(key_pair.public_key(), b"bulk key material").expect("Should encrypt");
        let plaintext = decrypt(key_pair.private_key(), &ciphertext).expect("Should decrypt");
        assert_eq!(plaintext, b"bulk key material");
        assert!(decrypt(test_keys::key(2).private_key(), &ciphertext).is_err());
    }

    #[test]
    fn test_sign_verify() {
        let key_pair = test_keys::key(1);
        let signature = sign(key_pair.private_key(), "signed info").expect("Should sign");
        assert!(verify(key_pair.public_key(), "signed info", &signature));
        assert!(!verify(key_pair.public_key(), "signed inf0", &signature));
        assert!(!verify(test_keys::key(2).public_key(), "signed info", &signature));
    }

    #[test]
    fn test_load_or_generate_persists_key() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("keys").join("device.pem");

        let generated = DeviceKeyPair::load_or_generate(&path, 1024).expect("Should generate key");
        assert!(path.exists());
        let loaded = DeviceKeyPair::load_or_generate(&path, 1024).expect("Should load key");
        assert_eq!(generated.public_key_xml(), loaded.public_key_xml());
    }
}
