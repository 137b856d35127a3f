//! Freshness blocks, XML-DSig style signatures and the signed SOAP envelope.
//!
//! A signed request carries two references: `#Freshness`, the anchor that
//! binds the message to the device's current lifetime sequence base or to a
//! session counter, and `#Body`, the action element. Both are digested as the
//! exact received bytes between their opening and closing tags.

pub mod envelope;
pub mod signature;

pub use envelope::{ParsedEnvelope, SignatureBlock, SignatureKeyInfo};

use crate::errors::{SecurityError, SecurityResult};
use crate::xml::{self, XmlEvent};

pub const DEVICE_SECURITY_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:DeviceSecurity:1";

pub const FRESHNESS_REFERENCE: &str = "Freshness";
pub const BODY_REFERENCE: &str = "Body";

/// What a freshness block pins the message to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Public-key mode: the device's lifetime sequence base.
    Lifetime(String),
    /// Session mode.
    Session {
        sequence_base: String,
        sequence_number: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub anchor: Anchor,
    pub control_url: String,
}

impl Freshness {
    pub fn lifetime(lifetime_sequence_base: impl Into<String>, control_url: impl Into<String>) -> Self {
        Freshness {
            anchor: Anchor::Lifetime(lifetime_sequence_base.into()),
            control_url: control_url.into(),
        }
    }

    pub fn session(
        sequence_base: impl Into<String>,
        sequence_number: u32,
        control_url: impl Into<String>,
    ) -> Self {
        Freshness {
            anchor: Anchor::Session {
                sequence_base: sequence_base.into(),
                sequence_number,
            },
            control_url: control_url.into(),
        }
    }

    /// Content of the `<Freshness>` element; this is what gets digested.
    pub fn body(&self) -> String {
        let anchor = match &self.anchor {
            Anchor::Lifetime(base) => xml::text_element("LifetimeSequenceBase", base),
            Anchor::Session {
                sequence_base,
                sequence_number,
            } => format!(
                "{}{}",
                xml::text_element("SequenceBase", sequence_base),
                xml::text_element("SequenceNumber", &sequence_number.to_string())
            ),
        };
        format!("{}{}", anchor, xml::text_element("controlURL", &self.control_url))
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<Freshness xmlns=\"{ns}\" xmlns:us=\"{ns}\" us:Id=\"{id}\">{body}</Freshness>",
            ns = DEVICE_SECURITY_SERVICE_TYPE,
            id = FRESHNESS_REFERENCE,
            body = self.body()
        )
    }

    /// Parse the content of a `<Freshness>` element.
    pub fn parse_body(body: &str) -> SecurityResult<Self> {
        let mut lifetime = None;
        let mut sequence_base = None;
        let mut sequence_number = None;
        let mut control_url = None;

        // wrap so sibling elements form a single document
        let document = format!("<Freshness>{}</Freshness>", body);
        xml::walk(&document, |event| {
            if let XmlEvent::Text { path, text } = event {
                if path.len() != 2 {
                    return Ok(());
                }
                match xml::local_name(&path[1]) {
                    "LifetimeSequenceBase" => lifetime = Some(text),
                    "SequenceBase" => sequence_base = Some(text),
                    "SequenceNumber" => {
                        sequence_number = Some(text.trim().parse::<u32>().map_err(|_| {
                            SecurityError::MalformedInput(format!("bad sequence number {}", text))
                        })?)
                    }
                    "controlURL" => control_url = Some(text),
                    _ => {}
                }
            }
            Ok(())
        })?;

        let control_url = control_url
            .ok_or_else(|| SecurityError::MalformedInput("freshness lacks controlURL".to_string()))?;
        let anchor = match (lifetime, sequence_base, sequence_number) {
            (Some(base), None, None) => Anchor::Lifetime(base),
            (None, Some(sequence_base), Some(sequence_number)) => Anchor::Session {
                sequence_base,
                sequence_number,
            },
            _ => {
                return Err(SecurityError::MalformedInput(
                    "freshness needs a lifetime base or a session sequence".to_string(),
                ))
            }
        };
        Ok(Freshness {
            anchor,
            control_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lifetime_body_layout() {
        let freshness = Freshness::lifetime("BASE", "/control/security");
        assert_eq!(
            freshness.body(),
            "<LifetimeSequenceBase>BASE</LifetimeSequenceBase><controlURL>/control/security</controlURL>"
        );
        assert!(freshness
            .to_xml()
            .starts_with("<Freshness xmlns=\"urn:schemas-upnp-org:service:DeviceSecurity:1\""));
    }

    #[test]
    fn test_session_body_parses_back() {
        let freshness = Freshness::session("SB", 42, "/ctl");
        assert_eq!(
            freshness.body(),
            "<SequenceBase>SB</SequenceBase><SequenceNumber>42</SequenceNumber><controlURL>/ctl</controlURL>"
        );
        assert_eq!(
            Freshness::parse_body(&freshness.body()).expect("Should parse"),
            freshness
        );
    }

    #[test]
    fn test_parse_rejects_mixed_or_missing_anchor() {
        assert!(Freshness::parse_body("<controlURL>/x</controlURL>").is_err());
        assert!(Freshness::parse_body(
            "<LifetimeSequenceBase>a</LifetimeSequenceBase><SequenceBase>b</SequenceBase>\
             <SequenceNumber>1</SequenceNumber><controlURL>/x</controlURL>"
        )
        .is_err());
        assert!(Freshness::parse_body(
            "<SequenceBase>b</SequenceBase><SequenceNumber>-1</SequenceNumber><controlURL>/x</controlURL>"
        )
        .is_err());
        assert!(Freshness::parse_body("<LifetimeSequenceBase>a</LifetimeSequenceBase>").is_err());
    }
}
