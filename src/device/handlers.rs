use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::acl::AclEntry;
use crate::crypto::{self, public_key};
use crate::device::actions::{arg, ActionArguments, ActionKind};
use crate::device::engine::DeviceSecurity;
use crate::device::VerifiedCaller;
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::Identity;
use crate::ownership;
use crate::security::secure_rng::random;
use crate::session::SessionKeys;
use crate::tunnel::{self, InnerMessage};

const SUPPORTED_DOCUMENT: &str = "<Supported><Protocols><p>UPnP</p></Protocols>\
<HashAlgorithms><p>SHA1</p></HashAlgorithms>\
<EncryptionAlgorithms><p>NULL</p><p>RSA</p><p>AES-128-CBC</p></EncryptionAlgorithms>\
<SigningAlgorithms><p>NULL</p><p>RSA</p><p>SHA1-HMAC</p></SigningAlgorithms></Supported>";

fn keys_document(public_key_xml: &str) -> String {
    format!("<Keys><Confidentiality>{}</Confidentiality></Keys>", public_key_xml)
}

fn base64_argument(arguments: &ActionArguments, name: &str) -> SecurityResult<Vec<u8>> {
    public_key::decode_base64(arguments.get(name)?)
}

impl DeviceSecurity {
    pub(super) fn handle_builtin(
        &self,
        kind: ActionKind,
        caller: &VerifiedCaller,
        arguments: &ActionArguments,
    ) -> SecurityResult<ActionArguments> {
        debug!(action = %kind, signed = caller.is_signed(), "Running security action");
        match kind {
            ActionKind::GetPublicKeys => Ok(ActionArguments::new()
                .with(arg::KEY_ARG, keys_document(self.key_pair.public_key_xml()))),
            ActionKind::GetAlgorithmsAndProtocols => {
                Ok(ActionArguments::new().with(arg::SUPPORTED, SUPPORTED_DOCUMENT))
            }
            ActionKind::GetAclSizes => self.acl_sizes(),
            ActionKind::GetLifetimeSequenceBase => Ok(ActionArguments::new()
                .with(arg::LIFETIME_SEQUENCE_BASE, self.lifetime_sequence_base()?)),
            ActionKind::SetSessionKeys => self.set_session_keys(caller, arguments),
            ActionKind::ExpireSessionKeys => self.expire_session_keys(arguments),
            ActionKind::DecryptAndExecute => self.decrypt_and_execute(arguments),
            ActionKind::TakeOwnership => self.take_ownership(caller, arguments),
            ActionKind::GetDefinedPermissions => {
                let state = self.lock()?;
                Ok(ActionArguments::new().with(
                    arg::PERMISSIONS,
                    state
                        .catalog
                        .defined_permissions_xml(&self.config.permissions_namespace),
                ))
            }
            ActionKind::GetDefinedProfiles => {
                let state = self.lock()?;
                Ok(ActionArguments::new().with(
                    arg::PROFILES,
                    state
                        .catalog
                        .defined_profiles_xml(&self.config.permissions_namespace),
                ))
            }
            ActionKind::ReadAcl => {
                let state = self.lock()?;
                Ok(ActionArguments::new()
                    .with(arg::VERSION, state.acl.version())
                    .with(arg::ACL, state.acl.to_xml()))
            }
            ActionKind::AddAclEntry => self.add_acl_entry(arguments),
            ActionKind::DeleteAclEntry => self.delete_acl_entry(arguments),
            ActionKind::GrantOwnership => self.grant_ownership(arguments),
            ActionKind::RevokeOwnership => self.revoke_ownership(caller, arguments),
            ActionKind::ListOwners => {
                let state = self.lock()?;
                Ok(ActionArguments::new()
                    .with(arg::NUMBER_OF_OWNERS, state.owners.len().to_string())
                    .with(arg::OWNERS, state.owners.to_xml()))
            }
            ActionKind::CacheCertificate
            | ActionKind::SetTimeHint
            | ActionKind::WriteAcl
            | ActionKind::ReplaceAclEntry
            | ActionKind::FactorySecurityReset => Err(SecurityError::NotImplemented(kind.name().to_string())),
        }
    }

    fn acl_sizes(&self) -> SecurityResult<ActionArguments> {
        let state = self.lock()?;
        let cert_cache = self.config.cert_cache_capacity.to_string();
        Ok(ActionArguments::new()
            .with(arg::TOTAL_ACL_SIZE, state.acl.capacity().to_string())
            .with(arg::FREE_ACL_SIZE, state.acl.free_size().to_string())
            .with(arg::TOTAL_OWNER_LIST_SIZE, state.owners.capacity().to_string())
            .with(arg::FREE_OWNER_LIST_SIZE, state.owners.free_size().to_string())
            .with(arg::TOTAL_CERT_CACHE_SIZE, cert_cache.clone())
            .with(arg::FREE_CERT_CACHE_SIZE, cert_cache))
    }

    fn set_session_keys(
        &self,
        caller: &VerifiedCaller,
        arguments: &ActionArguments,
    ) -> SecurityResult<ActionArguments> {
        let enciphered_bulk_key = base64_argument(arguments, arg::ENCIPHERED_BULK_KEY)?;
        let bulk_algorithm = arguments.get(arg::BULK_ALGORITHM)?;
        let ciphertext = base64_argument(arguments, arg::CIPHERTEXT)?;
        let cp_key_id = arguments.get_u32(arg::CP_KEY_ID)?;
        if bulk_algorithm != crypto::BULK_ALGORITHM_AES_128_CBC {
            return Err(SecurityError::UnsupportedAlgorithm(bulk_algorithm.to_string()));
        }

        let keys = SessionKeys::unwrap(self.key_pair.private_key(), &enciphered_bulk_key, &ciphertext)
            .map_err(|err| SecurityError::MalformedInput(format!("session key bundle rejected: {}", err)))?;

        let (device_key_id, sequence_base) =
            self.lock()?
                .sessions
                .establish(cp_key_id, keys, caller.public_key().cloned())?;
        info!(device_key_id, cp_key_id, "Session established");

        Ok(ActionArguments::new()
            .with(arg::DEVICE_KEY_ID, device_key_id.to_string())
            .with(arg::SEQUENCE_BASE, sequence_base))
    }

    fn expire_session_keys(&self, arguments: &ActionArguments) -> SecurityResult<ActionArguments> {
        let device_key_id = arguments.get_u32(arg::DEVICE_KEY_ID)?;
        self.lock()?.sessions.expire(device_key_id)?;
        info!(device_key_id, "Session expired");
        Ok(ActionArguments::new())
    }

    fn decrypt_and_execute(&self, arguments: &ActionArguments) -> SecurityResult<ActionArguments> {
        let device_key_id = arguments.get_u32(arg::DEVICE_KEY_ID)?;
        let request = base64_argument(arguments, arg::REQUEST)?;
        let iv = base64_argument(arguments, arg::IN_IV)?;

        let opened = {
            let state = self.lock()?;
            let session = state.sessions.get(device_key_id)?;
            tunnel::open(&session.keys().confidentiality_to_device, &iv, &request)
        };
        let inner_request = opened
            .and_then(|plaintext| InnerMessage::parse(&plaintext))
            .map_err(|err| SecurityError::DispatchFailed(err.to_string()))?;
        debug!(device_key_id, request = %inner_request.start_line(), "Tunnelled request");

        let inner_response = self
            .process_inner(inner_request)
            .map_err(|err| SecurityError::DispatchFailed(err.to_string()))?;

        let sealed = {
            let state = self.lock()?;
            let session = state.sessions.get(device_key_id)?;
            tunnel::seal(&session.keys().confidentiality_from_device, &inner_response.to_bytes())?
        };
        Ok(ActionArguments::new()
            .with(arg::REPLY, STANDARD.encode(&sealed.ciphertext))
            .with(arg::OUT_IV, STANDARD.encode(sealed.iv)))
    }

    fn take_ownership(
        &self,
        caller: &VerifiedCaller,
        arguments: &ActionArguments,
    ) -> SecurityResult<ActionArguments> {
        if !self.lock()?.owners.is_empty() {
            return Err(SecurityError::AlreadyOwned);
        }

        let algorithm = arguments.get(arg::HMAC_ALGORITHM)?;
        let encrypted_hmac = base64_argument(arguments, arg::ENCRYPTED_HMAC_VALUE)?;
        if !crypto::is_hmac_sha1(algorithm) {
            return Err(SecurityError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let caller_key = caller
            .public_key()
            .ok_or_else(|| SecurityError::MalformedInput("caller key unknown".to_string()))?;
        let presented = public_key::decrypt(self.key_pair.private_key(), &encrypted_hmac)
            .map_err(|_| SecurityError::OwnershipClaimRejected)?;
        let caller_key_xml = public_key::public_key_xml(caller_key);
        let owner = Identity::from_key_xml(&caller_key_xml);
        let next_base = random::sequence_base()?;

        let owners = {
            let mut state = self.lock()?;
            if !state.owners.is_empty() {
                return Err(SecurityError::AlreadyOwned);
            }
            if !ownership::verify_claim_hmac(
                state.device_secret.expose_secret(),
                &caller_key_xml,
                self.key_pair.public_key_xml(),
                &state.lifetime_sequence_base,
                &presented,
            ) {
                return Err(SecurityError::OwnershipClaimRejected);
            }
            state.owners.claim(owner.clone())?;
            state.lifetime_sequence_base = next_base;
            state.owners.owners().to_vec()
        };

        info!(owner = %owner, "Device ownership taken");
        self.persist_owners(&owners);
        Ok(ActionArguments::new())
    }

    fn grant_ownership(&self, arguments: &ActionArguments) -> SecurityResult<ActionArguments> {
        let algorithm = arguments.get(arg::HASH_ALGORITHM)?;
        let key_hash = arguments.get(arg::KEY_HASH)?;
        if algorithm != crypto::HASH_ALGORITHM_SHA1 {
            return Err(SecurityError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let identity = Identity::from_encoded(algorithm, key_hash)?;

        let owners = {
            let mut state = self.lock()?;
            state.owners.add(identity.clone())?;
            state.owners.owners().to_vec()
        };
        info!(owner = %identity, "Ownership granted");
        self.persist_owners(&owners);
        Ok(ActionArguments::new())
    }

    fn revoke_ownership(
        &self,
        caller: &VerifiedCaller,
        arguments: &ActionArguments,
    ) -> SecurityResult<ActionArguments> {
        let target = Identity::from_encoded(arguments.get(arg::HASH_ALGORITHM)?, arguments.get(arg::KEY_HASH)?)?;

        let owners = {
            let mut state = self.lock()?;
            if !state.owners.contains(&target) {
                return Err(SecurityError::NoSuchOwner);
            }
            let caller = caller
                .identity()
                .ok_or_else(|| SecurityError::MalformedInput("caller identity unknown".to_string()))?;
            state.owners.revoke(&caller, &target)?;
            state.owners.owners().to_vec()
        };
        info!(owner = %target, "Ownership revoked");
        self.persist_owners(&owners);
        Ok(ActionArguments::new())
    }

    fn add_acl_entry(&self, arguments: &ActionArguments) -> SecurityResult<ActionArguments> {
        let entry = AclEntry::parse(arguments.get(arg::ENTRY)?)
            .map_err(|err| SecurityError::MalformedAclEntry(err.to_string()))?;

        let entries = {
            let mut state = self.lock()?;
            state.acl.add(entry)?;
            state.acl.entries().to_vec()
        };
        info!(entries = entries.len(), "ACL entry added");
        self.persist_acl(&entries);
        Ok(ActionArguments::new())
    }

    fn delete_acl_entry(&self, arguments: &ActionArguments) -> SecurityResult<ActionArguments> {
        let target_version = arguments.get(arg::TARGET_ACL_VERSION)?;
        let index = arguments.get_u32(arg::INDEX)? as usize;

        let (entries, version) = {
            let mut state = self.lock()?;
            state.acl.remove(target_version, index)?;
            (state.acl.entries().to_vec(), state.acl.version().to_string())
        };
        info!(index, entries = entries.len(), "ACL entry deleted");
        self.persist_acl(&entries);
        Ok(ActionArguments::new().with(arg::NEW_ACL_VERSION, version))
    }
}
