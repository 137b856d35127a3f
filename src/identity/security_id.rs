use crate::errors::{SecurityError, SecurityResult};

/// Human-readable base32 rendering of key hashes and the ownership secret.
///
/// Five-bit groups map to `A-Z`, then `2 3 4 5 7 9`; a dash separates every
/// four characters. Only inputs whose length is a multiple of five bytes
/// have an encoding.
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234579";
const GROUP_LEN: usize = 4;

pub fn encode(data: &[u8]) -> Option<String> {
    if data.is_empty() || data.len() % 5 != 0 {
        return None;
    }

    let symbols = data.len() / 5 * 8;
    let mut out = String::with_capacity(symbols + symbols / GROUP_LEN);
    for chunk in data.chunks(5) {
        let bits = chunk.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        for i in 0..8 {
            if !out.is_empty() && (out.len() + 1) % (GROUP_LEN + 1) == 0 {
                out.push('-');
            }
            let value = ((bits >> (35 - 5 * i)) & 0x1f) as usize;
            out.push(char::from(ALPHABET[value]));
        }
    }
    Some(out)
}

pub fn decode(text: &str) -> SecurityResult<Vec<u8>> {
    let symbols: Vec<u8> = text
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| {
            ALPHABET
                .iter()
                .position(|&a| char::from(a) == c.to_ascii_uppercase())
                .map(|p| p as u8)
                .ok_or_else(|| SecurityError::InvalidEncoding(format!("invalid base32 symbol {:?}", c)))
        })
        .collect::<SecurityResult<_>>()?;

    if symbols.is_empty() || symbols.len() % 8 != 0 {
        return Err(SecurityError::InvalidEncoding(
            "base32 length must be a multiple of 8 symbols".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(symbols.len() / 8 * 5);
    for group in symbols.chunks(8) {
        let bits = group.iter().fold(0u64, |acc, &s| (acc << 5) | u64::from(s));
        out.extend_from_slice(&bits.to_be_bytes()[3..]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let encoded = encode(&[0u8; 5]).expect("Should encode 5 bytes");
        assert_eq!(encoded, "AAAA-AAAA");

        let encoded = encode(&[0xffu8; 5]).expect("Should encode 5 bytes");
        assert_eq!(encoded, "9999-9999");

        // 0b00000 00001 11010 11110 ...
        let encoded = encode(&[0x00, 0x75, 0xe0, 0x00, 0x00]).expect("Should encode");
        assert_eq!(&encoded[..4], "AB27");
    }

    #[test]
    fn test_sha1_sized_hash_has_eight_groups() {
        let encoded = encode(&[0x5au8; 20]).expect("Should encode 20 bytes");
        assert_eq!(encoded.len(), 32 + 7);
        assert_eq!(encoded.split('-').count(), 8);
        assert!(encoded.split('-').all(|group| group.len() == 4));
    }

    #[test]
    fn test_unencodable_lengths() {
        assert_eq!(encode(&[1, 2, 3]), None);
        assert_eq!(encode(&[]), None);
    }

    #[test]
    fn test_decode_rejects_foreign_symbols() {
        assert!(decode("AAAA-AAA1").is_err());
        assert!(decode("AAAA-AAA").is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(groups in 1usize..6, seed in any::<u8>()) {
            let data: Vec<u8> = (0..groups * 5).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect();
            let encoded = encode(&data).expect("Should encode");
            prop_assert_eq!(decode(&encoded).expect("Should decode"), data);
        }
    }
}
