use rsa::RsaPublicKey;

use crate::crypto::{public_key, DeviceKeyPair};
use crate::errors::{SecurityError, SecurityResult};
use crate::freshness::signature::{self, Reference};
use crate::freshness::DEVICE_SECURITY_SERVICE_TYPE;
use crate::identity::Identity;
use crate::xml::{self, XmlEvent};

/// Delegated permission: `issuer` grants `subject` the `permissions` on
/// `device` for the given window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCertificate {
    pub issuer: Identity,
    pub subject: Identity,
    pub device: Identity,
    pub permissions: Vec<String>,
    pub not_before: String,
    pub not_after: String,
}

impl AuthorizationCertificate {
    pub fn new(
        issuer: Identity,
        subject: Identity,
        device: Identity,
        permissions: Vec<String>,
        not_before: impl Into<String>,
        not_after: impl Into<String>,
    ) -> Self {
        AuthorizationCertificate {
            issuer,
            subject,
            device,
            permissions,
            not_before: not_before.into(),
            not_after: not_after.into(),
        }
    }

    pub fn is_valid_at(&self, now: &str) -> bool {
        now >= self.not_before.as_str() && now <= self.not_after.as_str()
    }

    /// Certificate description; the content of `<cert>`.
    pub fn to_xml(&self) -> String {
        format!(
            "<issuer>{}</issuer><subject>{}</subject><tag><device>{}</device><access>{}</access></tag>\
             <valid>{}{}</valid>",
            self.issuer.to_xml(),
            self.subject.to_xml(),
            self.device.to_xml(),
            self.permissions.concat(),
            xml::text_element("not-before", &self.not_before),
            xml::text_element("not-after", &self.not_after),
        )
    }

    /// `<cert us:Id=..>description</cert>` followed by an RSA signature
    /// whose single reference covers the description.
    pub fn to_signed_xml(&self, id: &str, issuer_key: &DeviceKeyPair) -> SecurityResult<String> {
        let description = self.to_xml();
        let signature = signature::rsa_signature(
            &[Reference::over(id, &description)],
            issuer_key.private_key(),
            issuer_key.public_key_xml(),
        )?;
        Ok(format!(
            "<cert us:Id=\"{}\" xmlns=\"{}\">{}</cert>{}",
            xml::escape(id),
            DEVICE_SECURITY_SERVICE_TYPE,
            description,
            signature
        ))
    }

    /// Parse a certificate description.
    pub fn parse_xml(description: &str) -> SecurityResult<Self> {
        let section = |tag: &str| {
            xml::raw_inner(description, tag)
                .ok_or_else(|| SecurityError::MalformedInput(format!("certificate lacks {}", tag)))
        };
        let issuer = Identity::parse_xml(section("issuer")?)?;
        let subject = Identity::parse_xml(section("subject")?)?;
        let device = Identity::parse_xml(section("device")?)?;

        let mut permissions = Vec::new();
        xml::walk(&format!("<access>{}</access>", section("access")?), |event| {
            if let XmlEvent::Open { path, .. } = event {
                if path.len() == 2 {
                    permissions.push(format!("<{}/>", path[1]));
                }
            }
            Ok(())
        })?;

        let mut not_before = None;
        let mut not_after = None;
        xml::walk(&format!("<valid>{}</valid>", section("valid")?), |event| {
            if let XmlEvent::Text { path, text } = event {
                match path.last().map(|name| xml::local_name(name)) {
                    Some("not-before") => not_before = Some(text),
                    Some("not-after") => not_after = Some(text),
                    _ => {}
                }
            }
            Ok(())
        })?;

        match (not_before, not_after) {
            (Some(not_before), Some(not_after)) => Ok(AuthorizationCertificate {
                issuer,
                subject,
                device,
                permissions,
                not_before,
                not_after,
            }),
            _ => Err(SecurityError::MalformedInput(
                "certificate validity needs both bounds".to_string(),
            )),
        }
    }

    /// Check a document produced by [`AuthorizationCertificate::to_signed_xml`].
    /// The signing key must hash to the certificate's issuer.
    pub fn verify_signed(document: &str) -> SecurityResult<(Self, RsaPublicKey)> {
        let description = xml::raw_inner(document, "cert")
            .ok_or_else(|| SecurityError::MalformedInput("no cert element".to_string()))?;
        let signed_info = xml::raw_inner(document, "SignedInfo")
            .ok_or_else(|| SecurityError::MalformedInput("no SignedInfo".to_string()))?;
        let signature_value = public_key::decode_base64(
            xml::raw_inner(document, "SignatureValue")
                .ok_or_else(|| SecurityError::MalformedInput("no SignatureValue".to_string()))?,
        )?;
        let signer = public_key::parse_public_key_xml(
            xml::raw_inner(document, "KeyValue")
                .ok_or_else(|| SecurityError::MalformedInput("no KeyValue".to_string()))?,
        )?;

        let digest_claimed = xml::raw_inner(signed_info, "DigestValue").map(str::trim);
        let digest_actual = Reference::over("", description).digest;
        if digest_claimed != Some(digest_actual.as_str())
            || !public_key::verify(&signer, signed_info, &signature_value)
        {
            return Err(SecurityError::AuthenticationFailed);
        }

        let certificate = Self::parse_xml(description)?;
        if Identity::from_key(&signer) != certificate.issuer {
            return Err(SecurityError::AuthenticationFailed);
        }
        Ok((certificate, signer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::public_key::test_keys;
    use pretty_assertions::assert_eq;

    fn certificate(issuer: &DeviceKeyPair) -> AuthorizationCertificate {
        AuthorizationCertificate::new(
            Identity::from_key(issuer.public_key()),
            Identity::from_key(test_keys::key(1).public_key()),
            Identity::from_key(test_keys::key(2).public_key()),
            vec!["<mfgr:trusted/>".to_string(), "<mfgr:aclEditor/>".to_string()],
            "2024-01-01T00:00:00Z",
            "2025-01-01T00:00:00Z",
        )
    }

    #[test]
    fn test_description_parses_back() {
        let issuer = test_keys::key(0);
        let certificate = certificate(&issuer);
        let description = certificate.to_xml();
        assert!(description.contains("<access><mfgr:trusted/><mfgr:aclEditor/></access>"));

        assert_eq!(
            AuthorizationCertificate::parse_xml(&description).expect("Should parse"),
            certificate
        );
    }

    #[test]
    fn test_signed_certificate_verifies() {
        let issuer = test_keys::key(0);
        let certificate = certificate(&issuer);
        let signed = certificate.to_signed_xml("cert1", &issuer).expect("Should sign");
        assert!(signed.starts_with("<cert us:Id=\"cert1\""));
        assert!(signed.contains("<Reference URI=\"#cert1\">"));

        let (verified, signer) =
            AuthorizationCertificate::verify_signed(&signed).expect("Should verify");
        assert_eq!(verified, certificate);
        assert_eq!(&signer, issuer.public_key());
    }

    #[test]
    fn test_tampered_or_foreign_signature_fails() {
        let issuer = test_keys::key(0);
        let signed = certificate(&issuer)
            .to_signed_xml("c", &issuer)
            .expect("Should sign");
        let tampered = signed.replace("2025-01-01", "2035-01-01");
        assert_eq!(
            AuthorizationCertificate::verify_signed(&tampered).unwrap_err(),
            SecurityError::AuthenticationFailed
        );

        // signed by someone other than the named issuer
        let impostor = test_keys::key(2);
        let forged = certificate(&issuer)
            .to_signed_xml("c", &impostor)
            .expect("Should sign");
        assert_eq!(
            AuthorizationCertificate::verify_signed(&forged).unwrap_err(),
            SecurityError::AuthenticationFailed
        );
    }

    #[test]
    fn test_validity_window() {
        let certificate = certificate(&test_keys::key(0));
        assert!(certificate.is_valid_at("2024-06-01T00:00:00Z"));
        assert!(!certificate.is_valid_at("2023-12-31T23:59:59Z"));
        assert!(!certificate.is_valid_at("2025-01-01T00:00:01Z"));
    }
}
