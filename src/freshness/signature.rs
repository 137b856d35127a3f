use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPrivateKey;

use crate::crypto::{digest, public_key};
use crate::errors::SecurityResult;

pub const CANONICALIZATION_METHOD: &str =
    "<CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>";
/// Both signing modes advertise the rsa-sha1 URI.
pub const SIGNATURE_METHOD: &str =
    "<SignatureMethods Algorithm=\"http://www.w3.org/2000/09/xmldsig#rsa-sha1\"/>";
pub const DIGEST_METHOD: &str = "<DigestMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#sha1\"/>";
pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

/// A named region and the base64 SHA-1 of its raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
    pub digest: String,
}

impl Reference {
    pub fn new(id: impl Into<String>, digest: impl Into<String>) -> Self {
        Reference {
            id: id.into(),
            digest: digest.into(),
        }
    }

    /// Reference digesting `content` as UTF-8.
    pub fn over(id: impl Into<String>, content: &str) -> Self {
        Self::new(id, digest::sha1_base64(content))
    }
}

/// Content of `<SignedInfo>`: the string that is actually signed.
pub fn signed_info(references: &[Reference]) -> String {
    let mut out = String::from(CANONICALIZATION_METHOD);
    out.push_str(SIGNATURE_METHOD);
    for reference in references {
        out.push_str(&format!(
            "<Reference URI=\"#{}\">{}<DigestValue>{}</DigestValue></Reference>",
            reference.id, DIGEST_METHOD, reference.digest
        ));
    }
    out
}

fn signature_element(signed_info: &str, signature: &[u8], key_info: &str) -> String {
    format!(
        "<Signature xmlns=\"{}\"><SignedInfo>{}</SignedInfo><SignatureValue>{}</SignatureValue>\
         <KeyInfo>{}</KeyInfo></Signature>",
        XMLDSIG_NAMESPACE,
        signed_info,
        STANDARD.encode(signature),
        key_info
    )
}

/// `<Signature>` signed with SHA1withRSA, carrying the signer's key.
pub fn rsa_signature(
    references: &[Reference],
    private_key: &RsaPrivateKey,
    public_key_xml: &str,
) -> SecurityResult<String> {
    let source = signed_info(references);
    let signature = public_key::sign(private_key, &source)?;
    Ok(signature_element(
        &source,
        &signature,
        &format!("<KeyValue>{}</KeyValue>", public_key_xml),
    ))
}

/// `<Signature>` authenticated with HMAC-SHA1, naming the session key by ID.
pub fn hmac_signature(references: &[Reference], key: &[u8], key_id: u32) -> SecurityResult<String> {
    let source = signed_info(references);
    let signature = digest::hmac_sha1(key, source.as_bytes())?;
    Ok(signature_element(
        &source,
        &signature,
        &format!("<KeyName>{}</KeyName>", key_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signed_info_layout() {
        let source = signed_info(&[Reference::new("Freshness", "AAA="), Reference::new("Body", "BBB=")]);
        assert_eq!(
            source,
            "<CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>\
             <SignatureMethods Algorithm=\"http://www.w3.org/2000/09/xmldsig#rsa-sha1\"/>\
             <Reference URI=\"#Freshness\"><DigestMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#sha1\"/>\
             <DigestValue>AAA=</DigestValue></Reference>\
             <Reference URI=\"#Body\"><DigestMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#sha1\"/>\
             <DigestValue>BBB=</DigestValue></Reference>"
        );
    }

    #[test]
    fn test_hmac_signature_names_key() {
        let element = hmac_signature(&[Reference::over("Body", "<x/>")], b"key", 12)
            .expect("Should sign");
        assert!(element.ends_with("<KeyInfo><KeyName>12</KeyName></KeyInfo></Signature>"));

        let source = xml::raw_inner(&element, "SignedInfo").expect("Should contain SignedInfo");
        let value = xml::raw_inner(&element, "SignatureValue").expect("Should contain value");
        let mac = public_key::decode_base64(value).expect("Should decode");
        assert!(digest::verify_hmac_sha1(b"key", source.as_bytes(), &mac));
    }
}
