use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::errors::{SecurityError, SecurityResult};

type HmacSha1 = Hmac<Sha1>;

pub const SHA1_LEN: usize = 20;

pub fn sha1(data: &[u8]) -> [u8; SHA1_LEN] {
    Sha1::digest(data).into()
}

/// Base64 SHA-1 of a string, the digest form used in signature references.
pub fn sha1_base64(text: &str) -> String {
    STANDARD.encode(sha1(text.as_bytes()))
}

pub fn hmac_sha1(key: &[u8], data: &[u8]) -> SecurityResult<[u8; SHA1_LEN]> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| SecurityError::Crypto(format!("HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC check.
pub fn verify_hmac_sha1(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    match HmacSha1::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(expected).is_ok()
        }
        Err(_) => false,
    }
}

pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}
