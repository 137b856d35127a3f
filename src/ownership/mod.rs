//! Owner list and the `TakeOwnership` claim.
//!
//! Owners hold every permission on the device. The list is bounded and is
//! only shrunk by an explicit revocation. The sole owner cannot revoke itself.

use crate::crypto::digest;
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::Identity;

pub const DEFAULT_OWNER_CAPACITY: usize = 5;

/// Length of the out-of-band device secret.
pub const DEVICE_SECRET_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct OwnerList {
    owners: Vec<Identity>,
    capacity: usize,
}

impl OwnerList {
    pub fn new(capacity: usize) -> Self {
        OwnerList {
            owners: Vec::new(),
            capacity,
        }
    }

    pub fn owners(&self) -> &[Identity] {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_size(&self) -> usize {
        self.capacity.saturating_sub(self.owners.len())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.owners.contains(identity)
    }

    /// First owner of an unowned device.
    pub fn claim(&mut self, identity: Identity) -> SecurityResult<()> {
        if !self.owners.is_empty() {
            return Err(SecurityError::AlreadyOwned);
        }
        self.add(identity)
    }

    pub fn add(&mut self, identity: Identity) -> SecurityResult<()> {
        if self.contains(&identity) {
            return Err(SecurityError::OwnerAlreadyPresent);
        }
        if self.owners.len() >= self.capacity {
            return Err(SecurityError::CapacityExceeded("owner list"));
        }
        self.owners.push(identity);
        Ok(())
    }

    /// Remove `target` on behalf of `caller`. The sole owner cannot remove itself.
    pub fn revoke(&mut self, caller: &Identity, target: &Identity) -> SecurityResult<()> {
        let position = self
            .owners
            .iter()
            .position(|owner| owner == target)
            .ok_or(SecurityError::NoSuchOwner)?;
        if self.owners.len() == 1 && &self.owners[0] == caller {
            return Err(SecurityError::CannotSelfOrphan);
        }
        self.owners.remove(position);
        Ok(())
    }

    pub fn replace_all(&mut self, owners: Vec<Identity>) -> SecurityResult<()> {
        if owners.len() > self.capacity {
            return Err(SecurityError::CapacityExceeded("owner list"));
        }
        self.owners = owners;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }

    /// `<Owners><hash>..</hash>*</Owners>`
    pub fn to_xml(&self) -> String {
        owners_to_xml(&self.owners)
    }
}

pub fn owners_to_xml(owners: &[Identity]) -> String {
    let mut out = String::from("<Owners>");
    for owner in owners {
        out.push_str(&owner.to_xml());
    }
    out.push_str("</Owners>");
    out
}

/// Proof of knowledge of the device secret, bound to both keys and the
/// lifetime sequence base current at claim time.
pub fn claim_hmac(
    device_secret: &[u8],
    caller_public_key_xml: &str,
    device_public_key_xml: &str,
    lifetime_sequence_base: &str,
) -> SecurityResult<[u8; digest::SHA1_LEN]> {
    let message = format!(
        "{}{}{}",
        caller_public_key_xml, device_public_key_xml, lifetime_sequence_base
    );
    digest::hmac_sha1(device_secret, message.as_bytes())
}

pub fn verify_claim_hmac(
    device_secret: &[u8],
    caller_public_key_xml: &str,
    device_public_key_xml: &str,
    lifetime_sequence_base: &str,
    presented: &[u8],
) -> bool {
    let message = format!(
        "{}{}{}",
        caller_public_key_xml, device_public_key_xml, lifetime_sequence_base
    );
    digest::verify_hmac_sha1(device_secret, message.as_bytes(), presented)
}
