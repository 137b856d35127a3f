use std::ops::Range;

use rsa::RsaPublicKey;

use crate::crypto::{digest, public_key, DeviceKeyPair};
use crate::device::actions::ActionArguments;
use crate::errors::{ActionError, SecurityError, SecurityResult};
use crate::freshness::signature::{self, Reference};
use crate::freshness::{Freshness, BODY_REFERENCE, DEVICE_SECURITY_SERVICE_TYPE, FRESHNESS_REFERENCE};
use crate::xml::{self, XmlEvent};

pub const SOAP_ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const UPNP_CONTROL_NAMESPACE: &str = "urn:schemas-upnp-org:control-1-0";

/// `<u:{action} xmlns:u="{service_type}"><Arg>value</Arg>...</u:{action}>`
pub fn action_body(service_type: &str, action_name: &str, arguments: &ActionArguments) -> String {
    let mut out = format!("<u:{} xmlns:u=\"{}\">", action_name, xml::escape(service_type));
    for (name, value) in arguments.iter() {
        out.push_str(&xml::text_element(name, value));
    }
    out.push_str(&format!("</u:{}>", action_name));
    out
}

fn assemble(security_info: Option<String>, action: &str) -> String {
    let mut out = format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\n",
        SOAP_ENVELOPE_NAMESPACE, SOAP_ENCODING_STYLE
    );
    match security_info {
        Some(security_info) => {
            out.push_str("<s:Header>\n<SecurityInfo>");
            out.push_str(&security_info);
            out.push_str("</SecurityInfo>\n</s:Header>\n");
            out.push_str(&format!(
                "<s:Body xmlns:us=\"{}\" us:Id=\"{}\">",
                DEVICE_SECURITY_SERVICE_TYPE, BODY_REFERENCE
            ));
        }
        None => out.push_str("<s:Body>"),
    }
    out.push_str(action);
    out.push_str("</s:Body>\n</s:Envelope>");
    out
}

fn references(freshness: &Freshness, action: &str) -> [Reference; 2] {
    [
        Reference::over(FRESHNESS_REFERENCE, &freshness.body()),
        Reference::over(BODY_REFERENCE, action),
    ]
}

pub fn unsigned_envelope(action: &str) -> String {
    assemble(None, action)
}

/// Body element answering `action_name`.
pub fn response_body(service_type: &str, action_name: &str, arguments: &ActionArguments) -> String {
    action_body(service_type, &format!("{}Response", action_name), arguments)
}

/// SOAP fault carrying a UPnP error.
pub fn fault_envelope(error: &ActionError) -> String {
    assemble(
        None,
        &format!(
            "<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>\
             <detail><UPnPError xmlns=\"{}\">{}{}</UPnPError></detail></s:Fault>",
            UPNP_CONTROL_NAMESPACE,
            xml::text_element("errorCode", &error.code.to_string()),
            xml::text_element("errorDescription", &error.description),
        ),
    )
}

/// The UPnP error in a fault envelope, if it is one.
pub fn parse_fault(envelope: &str) -> Option<ActionError> {
    let code = xml::raw_inner(envelope, "errorCode")?.trim().parse().ok()?;
    let description = xml::raw_inner(envelope, "errorDescription").unwrap_or_default();
    Some(ActionError::new(code, description))
}

/// Envelope signed with `key_pair`; `freshness` should carry the device's
/// current lifetime sequence base.
pub fn rsa_signed_envelope(
    freshness: &Freshness,
    key_pair: &DeviceKeyPair,
    action: &str,
) -> SecurityResult<String> {
    let signature = signature::rsa_signature(
        &references(freshness, action),
        key_pair.private_key(),
        key_pair.public_key_xml(),
    )?;
    Ok(assemble(Some(format!("{}{}", freshness.to_xml(), signature)), action))
}

/// Envelope authenticated with a session signing key named `key_id`.
pub fn hmac_signed_envelope(
    freshness: &Freshness,
    signing_key: &[u8],
    key_id: u32,
    action: &str,
) -> SecurityResult<String> {
    let signature = signature::hmac_signature(&references(freshness, action), signing_key, key_id)?;
    Ok(assemble(Some(format!("{}{}", freshness.to_xml(), signature)), action))
}

/// Key material named by a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureKeyInfo {
    PublicKey(RsaPublicKey),
    KeyName(u32),
}

/// Security header of a received envelope, with digests recomputed over
/// the received bytes.
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    pub freshness: Freshness,
    pub key_info: SignatureKeyInfo,
    signed_info: String,
    signature_value: Vec<u8>,
    claimed: Vec<Reference>,
    computed: [Reference; 2],
}

impl SignatureBlock {
    /// True iff exactly the freshness and body references are present and
    /// both digests match the received content.
    pub fn digests_match(&self) -> bool {
        self.claimed.len() == self.computed.len()
            && self
                .computed
                .iter()
                .all(|computed| {
                    self.claimed.iter().any(|claimed| {
                        claimed.id == computed.id
                            && digest::constant_time_eq(claimed.digest.as_bytes(), computed.digest.as_bytes())
                    })
                })
    }

    /// Verify an RSA signature; returns the signer's key.
    pub fn verify_rsa(&self) -> SecurityResult<&RsaPublicKey> {
        let SignatureKeyInfo::PublicKey(key) = &self.key_info else {
            return Err(SecurityError::AuthenticationFailed);
        };
        if self.digests_match() && public_key::verify(key, &self.signed_info, &self.signature_value) {
            Ok(key)
        } else {
            Err(SecurityError::AuthenticationFailed)
        }
    }

    pub fn verify_hmac(&self, signing_key: &[u8]) -> SecurityResult<()> {
        if self.digests_match()
            && digest::verify_hmac_sha1(signing_key, self.signed_info.as_bytes(), &self.signature_value)
        {
            Ok(())
        } else {
            Err(SecurityError::AuthenticationFailed)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
    pub service_type: Option<String>,
    pub action_name: String,
    pub arguments: ActionArguments,
    pub signature: Option<SignatureBlock>,
}

#[derive(Default)]
struct HeaderParts {
    has_signature: bool,
    current_uri: Option<String>,
    claimed: Vec<Reference>,
    signature_value: Option<String>,
    key_name: Option<String>,
    modulus: Option<String>,
    exponent: Option<String>,
    body: Region,
    freshness: Region,
    signed_info: Region,
}

/// Content span of an element that must occur at most once.
#[derive(Default)]
struct Region {
    start: Option<usize>,
    span: Option<Range<usize>>,
}

impl Region {
    fn open(&mut self, name: &str, content_start: usize) -> SecurityResult<()> {
        if self.start.is_some() {
            return Err(SecurityError::MalformedInput(format!(
                "envelope holds more than one {}",
                name
            )));
        }
        self.start = Some(content_start);
        Ok(())
    }

    fn close(&mut self, content_end: usize) {
        self.span = self.start.map(|start| start..content_end);
    }

    fn slice<'a>(&self, envelope: &'a str) -> Option<&'a str> {
        self.span.clone().and_then(|span| envelope.get(span))
    }
}

const BODY_PATH: [&str; 2] = ["Envelope", "Body"];
const FRESHNESS_PATH: [&str; 4] = ["Envelope", "Header", "SecurityInfo", "Freshness"];
const SIGNATURE_PATH: [&str; 4] = ["Envelope", "Header", "SecurityInfo", "Signature"];

/// Path below the envelope's `Signature` element.
fn in_signature(path: &[String], tail: &[&str]) -> bool {
    path.len() == SIGNATURE_PATH.len() + tail.len()
        && xml::path_ends_with(path, tail)
        && xml::path_ends_with(&path[..SIGNATURE_PATH.len()], &SIGNATURE_PATH)
}

fn is_body_child(path: &[String], depth: usize) -> bool {
    path.len() == depth && xml::path_ends_with(&path[..2], &BODY_PATH)
}

/// Parse a SOAP action envelope, signed or not.
///
/// Signed regions are taken from the element the walk actually visited, so
/// comments or stray copies of `Body` or `Freshness` cannot stand in for the
/// content that is acted upon.
pub fn parse(envelope: &str) -> SecurityResult<ParsedEnvelope> {
    let mut header = HeaderParts::default();
    let mut service_type = None;
    let mut action_name = None;
    let mut arguments = ActionArguments::new();
    let mut roots = 0;

    xml::walk(envelope, |event| {
        match event {
            XmlEvent::Open {
                path,
                attributes,
                content_start,
            } => {
                if path.len() == 1 {
                    roots += 1;
                    if roots > 1 || xml::local_name(&path[0]) != "Envelope" {
                        return Err(SecurityError::MalformedInput(
                            "expected a single Envelope element".to_string(),
                        ));
                    }
                } else if xml::path_is(path, &BODY_PATH) {
                    header.body.open("Body", content_start)?;
                } else if xml::path_is(path, &FRESHNESS_PATH) {
                    header.freshness.open("Freshness", content_start)?;
                } else if xml::path_is(path, &SIGNATURE_PATH) {
                    if header.has_signature {
                        return Err(SecurityError::MalformedInput(
                            "envelope holds more than one Signature".to_string(),
                        ));
                    }
                    header.has_signature = true;
                } else if in_signature(path, &["SignedInfo"]) {
                    header.signed_info.open("SignedInfo", content_start)?;
                } else if in_signature(path, &["SignedInfo", "Reference"]) {
                    header.current_uri = attributes
                        .into_iter()
                        .find(|(key, _)| key == "URI")
                        .map(|(_, value)| value.trim_start_matches('#').to_string());
                } else if is_body_child(path, 3) {
                    if action_name.is_some() {
                        return Err(SecurityError::MalformedInput(
                            "body holds more than one action".to_string(),
                        ));
                    }
                    action_name = Some(xml::local_name(&path[2]).to_string());
                    service_type = attributes
                        .into_iter()
                        .find(|(key, _)| key.starts_with("xmlns"))
                        .map(|(_, value)| value);
                } else if is_body_child(path, 4) {
                    arguments.push(xml::local_name(&path[3]), "");
                }
            }
            XmlEvent::Text { path, text } => {
                if is_body_child(path, 4) {
                    arguments.append_to_last(&text);
                } else if in_signature(path, &["SignedInfo", "Reference", "DigestValue"]) {
                    let id = header.current_uri.clone().unwrap_or_default();
                    header.claimed.push(Reference::new(id, text.trim()));
                } else if in_signature(path, &["SignatureValue"]) {
                    header.signature_value = Some(text);
                } else if in_signature(path, &["KeyInfo", "KeyName"]) {
                    header.key_name = Some(text);
                } else if in_signature(path, &["KeyInfo", "KeyValue", "RSAKeyValue", "Modulus"]) {
                    header.modulus = Some(text);
                } else if in_signature(path, &["KeyInfo", "KeyValue", "RSAKeyValue", "Exponent"]) {
                    header.exponent = Some(text);
                }
            }
            XmlEvent::Close { path, content_end } => {
                if xml::path_is(path, &BODY_PATH) {
                    header.body.close(content_end);
                } else if xml::path_is(path, &FRESHNESS_PATH) {
                    header.freshness.close(content_end);
                } else if in_signature(path, &["SignedInfo"]) {
                    header.signed_info.close(content_end);
                }
            }
        }
        Ok(())
    })?;

    let action_name = action_name
        .ok_or_else(|| SecurityError::MalformedInput("envelope has no action".to_string()))?;
    let signature = if header.has_signature {
        Some(signature_block(envelope, header)?)
    } else {
        None
    };

    Ok(ParsedEnvelope {
        service_type,
        action_name,
        arguments,
        signature,
    })
}

fn signature_block(envelope: &str, header: HeaderParts) -> SecurityResult<SignatureBlock> {
    let missing = |what: &str| SecurityError::MalformedInput(format!("signature lacks {}", what));

    let freshness_raw = header.freshness.slice(envelope).ok_or_else(|| missing("freshness"))?;
    let body_raw = header.body.slice(envelope).ok_or_else(|| missing("body"))?;
    let signed_info = header.signed_info.slice(envelope).ok_or_else(|| missing("SignedInfo"))?;
    let signature_value = public_key::decode_base64(
        header
            .signature_value
            .as_deref()
            .ok_or_else(|| missing("SignatureValue"))?,
    )?;

    let key_info = match (header.key_name, header.modulus, header.exponent) {
        (Some(name), None, None) => SignatureKeyInfo::KeyName(
            name.trim()
                .parse::<u32>()
                .map_err(|_| SecurityError::MalformedInput(format!("bad key name {}", name)))?,
        ),
        (None, Some(modulus), Some(exponent)) => {
            SignatureKeyInfo::PublicKey(public_key::parse_public_key_xml(&format!(
                "<RSAKeyValue><Modulus>{}</Modulus><Exponent>{}</Exponent></RSAKeyValue>",
                modulus, exponent
            ))?)
        }
        _ => return Err(missing("KeyInfo")),
    };

    Ok(SignatureBlock {
        freshness: Freshness::parse_body(freshness_raw)?,
        key_info,
        signed_info: signed_info.to_string(),
        signature_value,
        claimed: header.claimed,
        computed: [
            Reference::over(FRESHNESS_REFERENCE, freshness_raw),
            Reference::over(BODY_REFERENCE, body_raw),
        ],
    })
}
