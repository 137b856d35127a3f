use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use secrecy::{ExposeSecret, Secret};

use crate::errors::{SecurityError, SecurityResult};
use crate::security::secure_rng;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// 128-bit AES key, zeroized on drop.
pub type AesKey = Secret<[u8; AES_KEY_LEN]>;

pub fn generate_aes_key() -> SecurityResult<AesKey> {
    Ok(Secret::new(secure_rng::random::array::<AES_KEY_LEN>()?))
}

pub fn generate_iv() -> SecurityResult<[u8; IV_LEN]> {
    Ok(secure_rng::random::array::<IV_LEN>()?)
}

pub fn aes_key_from_slice(bytes: &[u8]) -> SecurityResult<AesKey> {
    let key: [u8; AES_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| SecurityError::MalformedInput(format!("AES key must be {} bytes", AES_KEY_LEN)))?;
    Ok(Secret::new(key))
}

/// Pads to a whole number of blocks. The final byte carries the pad length
/// (1..=16), the remaining pad bytes are zero. Aligned input gains a full block.
fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - data.len() % BLOCK_LEN;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len - 1, 0);
    padded.push(pad_len as u8);
    padded
}

fn unpad(mut data: Vec<u8>) -> SecurityResult<Vec<u8>> {
    let pad_len = *data
        .last()
        .ok_or_else(|| SecurityError::Crypto("empty plaintext".to_string()))? as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(SecurityError::Crypto("invalid padding".to_string()));
    }
    data.truncate(data.len() - pad_len);
    Ok(data)
}

/// AES-128-CBC encryption with the protocol's padding scheme.
pub fn encrypt(key: &AesKey, iv: &[u8], plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key.expose_secret(), iv)
        .map_err(|e| SecurityError::Crypto(format!("AES init: {}", e)))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&pad(plaintext)))
}

pub fn decrypt(key: &AesKey, iv: &[u8], ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(SecurityError::Crypto("ciphertext is not block aligned".to_string()));
    }
    let cipher = Aes128CbcDec::new_from_slices(key.expose_secret(), iv)
        .map_err(|e| SecurityError::Crypto(format!("AES init: {}", e)))?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| SecurityError::Crypto(format!("AES decrypt: {}", e)))?;
    unpad(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_padding_layout() {
        let padded = pad(b"abc");
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..3], b"abc");
        assert!(padded[3..15].iter().all(|&b| b == 0));
        assert_eq!(padded[15], 13);

        let aligned = pad(&[7u8; 16]);
        assert_eq!(aligned.len(), 32);
        assert_eq!(aligned[31], 16);
    }

    #[test]
    fn test_unpad_rejects_bad_lengths() {
        let mut block = vec![0u8; 16];
        block[15] = 17;
        assert!(unpad(block.clone()).is_err());
        block[15] = 0;
        assert!(unpad(block).is_err());
    }

    #[test]
    fn test_decrypt_rejects_unaligned_ciphertext() {
        let key = generate_aes_key().expect("Should generate key");
        let iv = generate_iv().expect("Should generate IV");
        assert!(decrypt(&key, &iv, &[1, 2, 3]).is_err());
        assert!(decrypt(&key, &iv, &[]).is_err());
    }

    #[test]
    fn test_wrong_key_does_not_recover_plaintext() {
        let key = generate_aes_key().expect("Should generate key");
        let other = generate_aes_key().expect("Should generate key");
        let iv = generate_iv().expect("Should generate IV");
        let ciphertext = encrypt(&key, &iv, b"secret payload").expect("Should encrypt");

        match decrypt(&other, &iv, &ciphertext) {
            Ok(plaintext) => assert_ne!(plaintext, b"secret payload"),
            Err(_) => {}
        }
    }

    proptest! {
        #[test]
        fn prop_aes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..200)) {
            let key = generate_aes_key().expect("Should generate key");
            let iv = generate_iv().expect("Should generate IV");
            let ciphertext = encrypt(&key, &iv, &data).expect("Should encrypt");
            prop_assert_eq!(ciphertext.len() % 16, 0);
            prop_assert_eq!(decrypt(&key, &iv, &ciphertext).expect("Should decrypt"), data);
        }
    }
}
