pub mod certificate;

pub use certificate::AuthorizationCertificate;

use std::collections::HashSet;

use crate::acl::{AclTable, PermissionCatalog};
use crate::device::actions::ActionKind;
use crate::identity::Identity;
use crate::ownership::OwnerList;

/// Which actions skip signature checks, and which are open to any signer.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    unsigned_actions: HashSet<String>,
    signed_actions: HashSet<String>,
}

impl AccessPolicy {
    pub fn device_security() -> Self {
        AccessPolicy {
            unsigned_actions: ActionKind::ALL
                .iter()
                .filter(|kind| kind.is_unsigned())
                .map(|kind| kind.name().to_string())
                .collect(),
            signed_actions: ActionKind::ALL
                .iter()
                .filter(|kind| kind.is_permitted_to_any_signer())
                .map(|kind| kind.name().to_string())
                .collect(),
        }
    }

    /// Let `action_name` through without any signature.
    pub fn add_unsigned_action(&mut self, action_name: impl Into<String>) {
        self.unsigned_actions.insert(action_name.into());
    }

    pub fn is_unsigned(&self, action_name: &str) -> bool {
        self.unsigned_actions.contains(action_name)
    }

    pub fn is_permitted_to_any_signer(&self, action_name: &str) -> bool {
        self.signed_actions.contains(action_name)
    }
}

/// Read-only view over the tables an access decision needs.
pub struct Authorizer<'a> {
    pub policy: &'a AccessPolicy,
    pub owners: &'a OwnerList,
    pub acl: &'a AclTable,
    pub catalog: &'a PermissionCatalog,
}

impl Authorizer<'_> {
    /// Decide whether `identity` (None for unsigned callers) may invoke `action_name` at `now`.
    ///
    /// Order: unsigned actions, then actions open to every signer, then
    /// owners, then the first ACL entry matching subject, time and permission.
    pub fn is_permitted(&self, identity: Option<&Identity>, action_name: &str, now: &str) -> bool {
        if self.policy.is_unsigned(action_name) {
            return true;
        }
        let Some(identity) = identity else {
            return false;
        };
        if self.policy.is_permitted_to_any_signer(action_name) || self.owners.contains(identity) {
            return true;
        }
        self.acl
            .first_match(identity, action_name, now, self.catalog)
            .is_some()
    }
}
