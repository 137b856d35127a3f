//! Caller side of the protocol: builds the requests a device expects and
//! checks what it sends back.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPublicKey;
use secrecy::ExposeSecret;

use crate::crypto::{self, public_key, DeviceKeyPair};
use crate::device::actions::{arg, ActionArguments};
use crate::errors::{SecurityError, SecurityResult};
use crate::freshness::envelope::{self, ParsedEnvelope, SignatureKeyInfo};
use crate::freshness::{Anchor, Freshness};
use crate::identity::Identity;
use crate::ownership;
use crate::session::{Session, SessionKeys};
use crate::tunnel::{self, InnerMessage};

#[derive(Debug, Clone)]
pub struct ControlPoint {
    key_pair: DeviceKeyPair,
    identity: Identity,
}

impl ControlPoint {
    pub fn new(key_pair: DeviceKeyPair) -> Self {
        let identity = Identity::from_key(key_pair.public_key());
        ControlPoint { key_pair, identity }
    }

    pub fn key_pair(&self) -> &DeviceKeyPair {
        &self.key_pair
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn unsigned_request(service_type: &str, action_name: &str, arguments: &ActionArguments) -> String {
        envelope::unsigned_envelope(&envelope::action_body(service_type, action_name, arguments))
    }

    /// Request signed with this control point's key and anchored at the
    /// device's current lifetime sequence base.
    pub fn rsa_signed_request(
        &self,
        lifetime_sequence_base: &str,
        control_url: &str,
        service_type: &str,
        action_name: &str,
        arguments: &ActionArguments,
    ) -> SecurityResult<String> {
        envelope::rsa_signed_envelope(
            &Freshness::lifetime(lifetime_sequence_base, control_url),
            &self.key_pair,
            &envelope::action_body(service_type, action_name, arguments),
        )
    }

    /// `TakeOwnership` arguments proving knowledge of `device_secret`.
    pub fn ownership_claim(
        &self,
        device_key: &RsaPublicKey,
        device_secret: &[u8],
        lifetime_sequence_base: &str,
    ) -> SecurityResult<ActionArguments> {
        let hmac = ownership::claim_hmac(
            device_secret,
            self.key_pair.public_key_xml(),
            &public_key::public_key_xml(device_key),
            lifetime_sequence_base,
        )?;
        let encrypted = public_key::encrypt(device_key, &hmac)?;
        Ok(ActionArguments::new()
            .with(arg::HMAC_ALGORITHM, crypto::SIGNING_ALGORITHM_HMAC_SHA1)
            .with(arg::ENCRYPTED_HMAC_VALUE, STANDARD.encode(encrypted)))
    }

    /// Fresh session keys and the `SetSessionKeys` arguments carrying them.
    pub fn session_request(
        &self,
        device_key: &RsaPublicKey,
        cp_key_id: u32,
    ) -> SecurityResult<(SessionKeys, ActionArguments)> {
        let keys = SessionKeys::generate()?;
        let wrapped = keys.wrap(device_key)?;
        let arguments = ActionArguments::new()
            .with(arg::ENCIPHERED_BULK_KEY, STANDARD.encode(&wrapped.enciphered_bulk_key))
            .with(arg::BULK_ALGORITHM, crypto::BULK_ALGORITHM_AES_128_CBC)
            .with(arg::CIPHERTEXT, STANDARD.encode(&wrapped.ciphertext))
            .with(arg::CP_KEY_ID, cp_key_id.to_string());
        Ok((keys, arguments))
    }

    /// Complete a session from the `SetSessionKeys` response.
    pub fn open_session(
        &self,
        cp_key_id: u32,
        keys: SessionKeys,
        response: &ActionArguments,
    ) -> SecurityResult<ControlPointSession> {
        let device_key_id = response.get_u32(arg::DEVICE_KEY_ID)?;
        let sequence_base = response.get(arg::SEQUENCE_BASE)?.to_string();
        Ok(ControlPointSession {
            session: Session::new(
                cp_key_id,
                device_key_id,
                keys,
                sequence_base,
                Some(self.key_pair.public_key().clone()),
            ),
        })
    }
}

/// The control point's copy of a session.
#[derive(Debug)]
pub struct ControlPointSession {
    session: Session,
}

impl ControlPointSession {
    pub fn device_key_id(&self) -> u32 {
        self.session.device_key_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Request signed with the session key under the next sequence number.
    pub fn hmac_signed_request(
        &mut self,
        control_url: &str,
        service_type: &str,
        action_name: &str,
        arguments: &ActionArguments,
    ) -> SecurityResult<String> {
        let sequence_number = self.session.next_cp_sequence()?;
        envelope::hmac_signed_envelope(
            &Freshness::session(self.session.sequence_base(), sequence_number, control_url),
            self.session.keys().signing_to_device.expose_secret(),
            self.session.device_key_id(),
            &envelope::action_body(service_type, action_name, arguments),
        )
    }

    /// `DecryptAndExecute` arguments carrying `inner`.
    pub fn tunnel_request(&self, inner: &InnerMessage) -> SecurityResult<ActionArguments> {
        let sealed = tunnel::seal(&self.session.keys().confidentiality_to_device, &inner.to_bytes())?;
        Ok(ActionArguments::new()
            .with(arg::DEVICE_KEY_ID, self.session.device_key_id().to_string())
            .with(arg::REQUEST, STANDARD.encode(&sealed.ciphertext))
            .with(arg::IN_IV, STANDARD.encode(sealed.iv)))
    }

    /// Decrypt the inner response of a `DecryptAndExecute` reply.
    pub fn open_reply(&self, response: &ActionArguments) -> SecurityResult<InnerMessage> {
        let reply = public_key::decode_base64(response.get(arg::REPLY)?)?;
        let iv = public_key::decode_base64(response.get(arg::OUT_IV)?)?;
        let plaintext = tunnel::open(&self.session.keys().confidentiality_from_device, &iv, &reply)?;
        InnerMessage::parse(&plaintext)
    }

    /// Check a session-signed response from the device.
    pub fn verify_response(&mut self, response: &str, control_url: &str) -> SecurityResult<ParsedEnvelope> {
        let parsed = envelope::parse(response)?;
        let block = parsed.signature.as_ref().ok_or(SecurityError::SignatureMissing)?;
        if block.key_info != SignatureKeyInfo::KeyName(self.session.device_key_id())
            || block.freshness.control_url != control_url
        {
            return Err(SecurityError::AuthenticationFailed);
        }
        let Anchor::Session {
            sequence_base,
            sequence_number,
        } = &block.freshness.anchor
        else {
            return Err(SecurityError::AuthenticationFailed);
        };
        block.verify_hmac(self.session.keys().signing_from_device.expose_secret())?;
        self.session.accept_device_sequence(sequence_base, *sequence_number)?;
        Ok(parsed)
    }
}
