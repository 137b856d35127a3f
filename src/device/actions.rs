use crate::errors::{SecurityError, SecurityResult};

/// Actions of the device security service. Wire names are kept as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    GetPublicKeys,
    GetAlgorithmsAndProtocols,
    GetAclSizes,
    CacheCertificate,
    SetTimeHint,
    GetLifetimeSequenceBase,
    SetSessionKeys,
    ExpireSessionKeys,
    DecryptAndExecute,
    TakeOwnership,
    GetDefinedPermissions,
    GetDefinedProfiles,
    ReadAcl,
    WriteAcl,
    AddAclEntry,
    DeleteAclEntry,
    ReplaceAclEntry,
    FactorySecurityReset,
    GrantOwnership,
    RevokeOwnership,
    ListOwners,
}

impl ActionKind {
    pub const ALL: [ActionKind; 21] = [
        ActionKind::GetPublicKeys,
        ActionKind::GetAlgorithmsAndProtocols,
        ActionKind::GetAclSizes,
        ActionKind::CacheCertificate,
        ActionKind::SetTimeHint,
        ActionKind::GetLifetimeSequenceBase,
        ActionKind::SetSessionKeys,
        ActionKind::ExpireSessionKeys,
        ActionKind::DecryptAndExecute,
        ActionKind::TakeOwnership,
        ActionKind::GetDefinedPermissions,
        ActionKind::GetDefinedProfiles,
        ActionKind::ReadAcl,
        ActionKind::WriteAcl,
        ActionKind::AddAclEntry,
        ActionKind::DeleteAclEntry,
        ActionKind::ReplaceAclEntry,
        ActionKind::FactorySecurityReset,
        ActionKind::GrantOwnership,
        ActionKind::RevokeOwnership,
        ActionKind::ListOwners,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::GetPublicKeys => "GetPublicKeys",
            ActionKind::GetAlgorithmsAndProtocols => "GetAlgorithmsAndProtocols",
            ActionKind::GetAclSizes => "GetACLSizes",
            ActionKind::CacheCertificate => "CacheCertificate",
            ActionKind::SetTimeHint => "SetTimeHint",
            ActionKind::GetLifetimeSequenceBase => "GetLifetimeSequenceBase",
            ActionKind::SetSessionKeys => "SetSessionKeys",
            ActionKind::ExpireSessionKeys => "ExpireSessionKeys",
            ActionKind::DecryptAndExecute => "DecryptAndExecute",
            ActionKind::TakeOwnership => "TakeOwnership",
            ActionKind::GetDefinedPermissions => "GetDefinedPermissions",
            ActionKind::GetDefinedProfiles => "GetDefinedProfiles",
            ActionKind::ReadAcl => "ReadACL",
            ActionKind::WriteAcl => "WriteACL",
            ActionKind::AddAclEntry => "AddACLEntry",
            ActionKind::DeleteAclEntry => "DeleteACLEntry",
            ActionKind::ReplaceAclEntry => "ReplaceACLEntry",
            ActionKind::FactorySecurityReset => "FactorySecurityReset",
            ActionKind::GrantOwnership => "GrantOwnership",
            ActionKind::RevokeOwnership => "RevokeOwnership",
            ActionKind::ListOwners => "ListOwners",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Discovery, the tunnel, session teardown and owner listing need no signature.
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            ActionKind::GetPublicKeys
                | ActionKind::GetAlgorithmsAndProtocols
                | ActionKind::GetLifetimeSequenceBase
                | ActionKind::ExpireSessionKeys
                | ActionKind::DecryptAndExecute
                | ActionKind::ListOwners
        )
    }

    /// Actions any authenticated caller may invoke, owner or not.
    pub fn is_permitted_to_any_signer(&self) -> bool {
        matches!(
            self,
            ActionKind::GetPublicKeys
                | ActionKind::GetAlgorithmsAndProtocols
                | ActionKind::GetLifetimeSequenceBase
                | ActionKind::SetSessionKeys
                | ActionKind::ExpireSessionKeys
                | ActionKind::DecryptAndExecute
                | ActionKind::CacheCertificate
                | ActionKind::TakeOwnership
                | ActionKind::ListOwners
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument names used on the wire.
pub mod arg {
    pub const KEY_ARG: &str = "KeyArg";
    pub const SUPPORTED: &str = "Supported";
    pub const TOTAL_ACL_SIZE: &str = "ArgTotalACLSize";
    pub const FREE_ACL_SIZE: &str = "ArgFreeACLSize";
    pub const TOTAL_OWNER_LIST_SIZE: &str = "ArgTotalOwnerListSize";
    pub const FREE_OWNER_LIST_SIZE: &str = "ArgFreeOwnerSize";
    pub const TOTAL_CERT_CACHE_SIZE: &str = "ArgTotalCertCacheSize";
    pub const FREE_CERT_CACHE_SIZE: &str = "ArgFreeCertCacheSize";
    pub const LIFETIME_SEQUENCE_BASE: &str = "ArgLifetimeSequenceBase";
    pub const ENCIPHERED_BULK_KEY: &str = "EncipheredBulkKey";
    pub const BULK_ALGORITHM: &str = "BulkAlgorithm";
    pub const CIPHERTEXT: &str = "Ciphertext";
    pub const CP_KEY_ID: &str = "CPKeyID";
    pub const DEVICE_KEY_ID: &str = "DeviceKeyID";
    pub const SEQUENCE_BASE: &str = "SequenceBase";
    pub const REQUEST: &str = "Request";
    pub const IN_IV: &str = "InIV";
    pub const REPLY: &str = "Reply";
    pub const OUT_IV: &str = "OutIV";
    pub const HMAC_ALGORITHM: &str = "HMACAlgorithm";
    pub const ENCRYPTED_HMAC_VALUE: &str = "EncryptedHMACValue";
    pub const PERMISSIONS: &str = "Permissions";
    pub const PROFILES: &str = "Profiles";
    pub const VERSION: &str = "Version";
    pub const ACL: &str = "ACL";
    pub const ENTRY: &str = "Entry";
    pub const TARGET_ACL_VERSION: &str = "TargetACLVersion";
    pub const INDEX: &str = "Index";
    pub const NEW_ACL_VERSION: &str = "NewACLVersion";
    pub const HASH_ALGORITHM: &str = "HashAlgorithm";
    pub const KEY_HASH: &str = "KeyHash";
    pub const NUMBER_OF_OWNERS: &str = "ArgNumberOfOwners";
    pub const OWNERS: &str = "Owners";
}

/// Ordered name/value pairs of an action request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionArguments(Vec<(String, String)>);

impl ActionArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub(crate) fn append_to_last(&mut self, text: &str) {
        if let Some((_, value)) = self.0.last_mut() {
            value.push_str(text);
        }
    }

    pub fn get(&self, name: &str) -> SecurityResult<&str> {
        self.get_opt(name)
            .ok_or_else(|| SecurityError::MalformedInput(format!("missing argument {}", name)))
    }

    pub fn get_opt(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parse a numeric argument.
    pub fn get_u32(&self, name: &str) -> SecurityResult<u32> {
        let value = self.get(name)?;
        value
            .trim()
            .parse()
            .map_err(|_| SecurityError::MalformedInput(format!("argument {} is not a number", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ActionArguments {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        ActionArguments(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
