//! The device side of the security service.
//!
//! [`DeviceSecurity`] verifies each request's signature and freshness,
//! decides whether the caller may run the action, then either runs one of
//! the built-in security actions or forwards to an [`ActionDispatcher`].

pub mod actions;
pub mod engine;
mod handlers;
pub mod traits;

pub use actions::{ActionArguments, ActionKind};
pub use engine::DeviceSecurity;
pub use traits::{ActionDispatcher, InnerMessageProcessor, OwnershipAware, SignedActionHandler};

use rsa::RsaPublicKey;

use crate::freshness::{ParsedEnvelope, SignatureBlock};
use crate::identity::Identity;

/// An action request as delivered by the transport, signature not yet checked.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub service_type: Option<String>,
    pub action_name: String,
    pub arguments: ActionArguments,
    pub signature: Option<SignatureBlock>,
}

impl ActionRequest {
    pub fn unsigned(action_name: impl Into<String>, arguments: ActionArguments) -> Self {
        ActionRequest {
            service_type: None,
            action_name: action_name.into(),
            arguments,
            signature: None,
        }
    }
}

impl From<ParsedEnvelope> for ActionRequest {
    fn from(envelope: ParsedEnvelope) -> Self {
        ActionRequest {
            service_type: envelope.service_type,
            action_name: envelope.action_name,
            arguments: envelope.arguments,
            signature: envelope.signature,
        }
    }
}

/// Who sent a request, once its signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedCaller {
    Unsigned,
    PublicKey(RsaPublicKey),
    Session {
        device_key_id: u32,
        caller_public_key: Option<RsaPublicKey>,
    },
}

impl VerifiedCaller {
    pub fn is_signed(&self) -> bool {
        !matches!(self, VerifiedCaller::Unsigned)
    }

    /// The caller's key: the signing key, or the key that opened the session.
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        match self {
            VerifiedCaller::Unsigned => None,
            VerifiedCaller::PublicKey(key) => Some(key),
            VerifiedCaller::Session {
                caller_public_key, ..
            } => caller_public_key.as_ref(),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.public_key().map(Identity::from_key)
    }
}
