use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, Secret};

use crate::crypto::symmetric::{self, AesKey, AES_KEY_LEN, IV_LEN};
use crate::crypto::{self, public_key};
use crate::errors::{SecurityError, SecurityResult};
use crate::security::secure_rng::random;
use crate::xml::{self, XmlEvent};

/// Length of freshly generated HMAC-SHA1 signing keys.
pub const SIGNING_KEY_LEN: usize = 64;

pub type SigningKey = Secret<Vec<u8>>;

/// The four symmetric keys of a session, one per purpose and direction.
pub struct SessionKeys {
    pub confidentiality_to_device: AesKey,
    pub confidentiality_from_device: AesKey,
    pub signing_to_device: SigningKey,
    pub signing_from_device: SigningKey,
}

/// A key bundle prepared for `SetSessionKeys`: the RSA-wrapped bulk key
/// (`IV || AES key`) and the bundle XML encrypted under it.
#[derive(Debug, Clone)]
pub struct WrappedSessionKeys {
    pub enciphered_bulk_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl SessionKeys {
    pub fn generate() -> SecurityResult<Self> {
        Ok(SessionKeys {
            confidentiality_to_device: symmetric::generate_aes_key()?,
            confidentiality_from_device: symmetric::generate_aes_key()?,
            signing_to_device: Secret::new(random::bytes(SIGNING_KEY_LEN)?),
            signing_from_device: Secret::new(random::bytes(SIGNING_KEY_LEN)?),
        })
    }

    /// `<SessionKeys>` document. Contains every key in the clear; only ever
    /// sent encrypted.
    pub fn to_xml(&self) -> String {
        format!(
            "<SessionKeys><Confidentiality><Algorithm>{}</Algorithm>\
             <KeyToDevice>{}</KeyToDevice><KeyFromDevice>{}</KeyFromDevice></Confidentiality>\
             <Signing><Algorithm>{}</Algorithm>\
             <KeyToDevice>{}</KeyToDevice><KeyFromDevice>{}</KeyFromDevice></Signing></SessionKeys>",
            crypto::BULK_ALGORITHM_AES_128_CBC,
            STANDARD.encode(self.confidentiality_to_device.expose_secret()),
            STANDARD.encode(self.confidentiality_from_device.expose_secret()),
            crypto::SIGNING_ALGORITHM_HMAC_SHA1,
            STANDARD.encode(self.signing_to_device.expose_secret()),
            STANDARD.encode(self.signing_from_device.expose_secret()),
        )
    }

    pub fn parse_xml(document: &str) -> SecurityResult<Self> {
        let mut conf_to = None;
        let mut conf_from = None;
        let mut sign_to = None;
        let mut sign_from = None;

        xml::walk(document, |event| {
            let XmlEvent::Text { path, text } = event else {
                return Ok(());
            };
            if path.len() != 3 || xml::local_name(&path[0]) != "SessionKeys" {
                return Ok(());
            }
            match (xml::local_name(&path[1]), xml::local_name(&path[2])) {
                ("Confidentiality", "Algorithm") if text != crypto::BULK_ALGORITHM_AES_128_CBC => {
                    return Err(SecurityError::UnsupportedAlgorithm(text));
                }
                ("Signing", "Algorithm") if !crypto::is_hmac_sha1(&text) => {
                    return Err(SecurityError::UnsupportedAlgorithm(text));
                }
                ("Confidentiality", "KeyToDevice") => {
                    conf_to = Some(symmetric::aes_key_from_slice(&public_key::decode_base64(&text)?)?)
                }
                ("Confidentiality", "KeyFromDevice") => {
                    conf_from = Some(symmetric::aes_key_from_slice(&public_key::decode_base64(&text)?)?)
                }
                ("Signing", "KeyToDevice") => sign_to = Some(signing_key(&text)?),
                ("Signing", "KeyFromDevice") => sign_from = Some(signing_key(&text)?),
                _ => {}
            }
            Ok(())
        })?;

        match (conf_to, conf_from, sign_to, sign_from) {
            (Some(confidentiality_to_device), Some(confidentiality_from_device), Some(signing_to_device), Some(signing_from_device)) => {
                Ok(SessionKeys {
                    confidentiality_to_device,
                    confidentiality_from_device,
                    signing_to_device,
                    signing_from_device,
                })
            }
            _ => Err(SecurityError::MalformedInput(
                "SessionKeys requires all four keys".to_string(),
            )),
        }
    }

    /// Encrypt this bundle for the device holding `device_key`.
    pub fn wrap(&self, device_key: &RsaPublicKey) -> SecurityResult<WrappedSessionKeys> {
        let bulk_key = symmetric::generate_aes_key()?;
        let iv = symmetric::generate_iv()?;

        let mut key_material = Vec::with_capacity(IV_LEN + AES_KEY_LEN);
        key_material.extend_from_slice(&iv);
        key_material.extend_from_slice(bulk_key.expose_secret());

        Ok(WrappedSessionKeys {
            enciphered_bulk_key: public_key::encrypt(device_key, &key_material)?,
            ciphertext: symmetric::encrypt(&bulk_key, &iv, self.to_xml().as_bytes())?,
        })
    }

    /// Inverse of [`SessionKeys::wrap`], run by the device.
    pub fn unwrap(
        device_key: &RsaPrivateKey,
        enciphered_bulk_key: &[u8],
        ciphertext: &[u8],
    ) -> SecurityResult<Self> {
        let key_material = public_key::decrypt(device_key, enciphered_bulk_key)?;
        if key_material.len() != IV_LEN + AES_KEY_LEN {
            return Err(SecurityError::MalformedInput(format!(
                "bulk key material must be {} bytes",
                IV_LEN + AES_KEY_LEN
            )));
        }
        let (iv, key) = key_material.split_at(IV_LEN);
        let bulk_key = symmetric::aes_key_from_slice(key)?;

        let plaintext = symmetric::decrypt(&bulk_key, iv, ciphertext)?;
        let document = String::from_utf8(plaintext)
            .map_err(|_| SecurityError::MalformedInput("SessionKeys is not UTF-8".to_string()))?;
        Self::parse_xml(&document)
    }
}

fn signing_key(text: &str) -> SecurityResult<SigningKey> {
    let bytes = public_key::decode_base64(text)?;
    if bytes.is_empty() {
        return Err(SecurityError::MalformedInput("empty signing key".to_string()));
    }
    Ok(Secret::new(bytes))
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}
