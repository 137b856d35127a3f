//! Framing and encryption for `DecryptAndExecute`.
//!
//! A tunnelled message is a complete HTTP request or response, terminated by
//! a single NUL byte, AES-128-CBC encrypted under one of the session's
//! confidentiality keys with a fresh IV per message.

use crate::crypto::symmetric::{self, AesKey, IV_LEN};
use crate::errors::{SecurityError, SecurityResult};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const XML_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// An HTTP message carried inside the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerMessage {
    /// Start line and header fields, without the blank line.
    pub header: String,
    pub body: Vec<u8>,
}

impl InnerMessage {
    pub fn new(header: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        InnerMessage {
            header: header.into(),
            body: body.into(),
        }
    }

    pub fn parse(bytes: &[u8]) -> SecurityResult<Self> {
        let split = bytes
            .windows(HEADER_TERMINATOR.len())
            .position(|window| window == HEADER_TERMINATOR)
            .ok_or_else(|| SecurityError::MalformedInput("inner message has no header end".to_string()))?;
        let header = std::str::from_utf8(&bytes[..split])
            .map_err(|_| SecurityError::MalformedInput("inner header is not UTF-8".to_string()))?;
        Ok(InnerMessage {
            header: header.to_string(),
            body: bytes[split + HEADER_TERMINATOR.len()..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + HEADER_TERMINATOR.len() + self.body.len());
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(HEADER_TERMINATOR);
        out.extend_from_slice(&self.body);
        out
    }

    /// SOAP control request for `control_url`.
    pub fn soap_request(control_url: &str, soap_action: &str, body: &str) -> Self {
        InnerMessage::new(
            format!(
                "POST {} HTTP/1.1\r\nCONTENT-TYPE: {}\r\nCONTENT-LENGTH: {}\r\nSOAPACTION: \"{}\"",
                control_url,
                XML_CONTENT_TYPE,
                body.len(),
                soap_action
            ),
            body,
        )
    }

    /// SOAP response with the given status code.
    pub fn soap_response(status: u16, body: &str) -> Self {
        let reason = match status {
            200 => "OK",
            _ => "Internal Server Error",
        };
        InnerMessage::new(
            format!(
                "HTTP/1.1 {} {}\r\nCONTENT-TYPE: {}\r\nCONTENT-LENGTH: {}",
                status,
                reason,
                XML_CONTENT_TYPE,
                body.len()
            ),
            body,
        )
    }

    pub fn start_line(&self) -> &str {
        self.header.lines().next().unwrap_or_default()
    }

    /// Path of a request line, e.g. `/control` for `POST /control HTTP/1.1`.
    pub fn request_target(&self) -> SecurityResult<&str> {
        let mut parts = self.start_line().split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_method), Some(target), Some(version)) if version.starts_with("HTTP/") => Ok(target),
            _ => Err(SecurityError::MalformedInput("not an HTTP request".to_string())),
        }
    }

    pub fn status_code(&self) -> SecurityResult<u16> {
        let mut parts = self.start_line().split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("HTTP/") => code
                .parse()
                .map_err(|_| SecurityError::MalformedInput(format!("bad status code {}", code))),
            _ => Err(SecurityError::MalformedInput("not an HTTP response".to_string())),
        }
    }

    pub fn body_text(&self) -> SecurityResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|_| SecurityError::MalformedInput("inner body is not UTF-8".to_string()))
    }
}

/// Ciphertext plus the IV it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Append the terminator and encrypt under a fresh IV.
pub fn seal(key: &AesKey, message: &[u8]) -> SecurityResult<SealedMessage> {
    let mut plaintext = Vec::with_capacity(message.len() + 1);
    plaintext.extend_from_slice(message);
    plaintext.push(0);

    let iv = symmetric::generate_iv()?;
    let ciphertext = symmetric::encrypt(key, &iv, &plaintext)?;
    Ok(SealedMessage { ciphertext, iv })
}

/// Decrypt and drop the terminator.
pub fn open(key: &AesKey, iv: &[u8], ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(SecurityError::MalformedInput(format!("IV must be {} bytes", IV_LEN)));
    }
    let mut plaintext = symmetric::decrypt(key, iv, ciphertext)?;
    if plaintext.last() == Some(&0) {
        plaintext.pop();
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> AesKey {
        symmetric::generate_aes_key().expect("Should generate key")
    }

    #[test]
    fn test_inner_message_split() {
        let raw = b"POST /control HTTP/1.1\r\nHOST: 10.0.0.1\r\n\r\n<s:Envelope/>";
        let message = InnerMessage::parse(raw).expect("Should parse");
        assert_eq!(message.header, "POST /control HTTP/1.1\r\nHOST: 10.0.0.1");
        assert_eq!(message.body_text().expect("Should be UTF-8"), "<s:Envelope/>");
        assert_eq!(message.to_bytes(), raw.to_vec());

        assert!(InnerMessage::parse(b"no terminator").is_err());
    }

    #[test]
    fn test_soap_framing() {
        let request = InnerMessage::soap_request("/upnp/control/ds", "urn:x#ReadACL", "<s:Envelope/>");
        assert_eq!(request.request_target().expect("Should be a request"), "/upnp/control/ds");
        assert!(request.header.contains("CONTENT-LENGTH: 13"));
        assert!(request.status_code().is_err());

        let response = InnerMessage::soap_response(500, "<fault/>");
        assert_eq!(response.status_code().expect("Should be a response"), 500);
        assert_eq!(response.start_line(), "HTTP/1.1 500 Internal Server Error");
        assert!(response.request_target().is_err());
    }

    #[test]
    fn test_repeated_seal_differs() {
        let key = key();
        let first = seal(&key, b"same").expect("Should seal");
        let second = seal(&key, b"same").expect("Should seal");
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_wrong_key_or_iv_fails_or_garbles() {
        let key = key();
        let sealed = seal(&key, b"HTTP/1.1 200 OK\r\n\r\n").expect("Should seal");
        assert!(open(&key, &sealed.iv[..8], &sealed.ciphertext).is_err());
        let other = open(&self::key(), &sealed.iv, &sealed.ciphertext);
        assert!(other.map_or(true, |p| p != b"HTTP/1.1 200 OK\r\n\r\n"));
    }

    proptest! {
        #[test]
        fn prop_tunnel_round_trip(message in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = key();
            let sealed = seal(&key, &message).expect("Should seal");
            let opened = open(&key, &sealed.iv, &sealed.ciphertext).expect("Should open");
            prop_assert_eq!(opened, message);
        }
    }
}
