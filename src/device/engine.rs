use secrecy::{ExposeSecret, Secret};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::acl::{AclEntry, AclTable, Clock, Permission, PermissionCatalog, Profile, SystemClock};
use crate::authorization::{AccessPolicy, Authorizer};
use crate::config::DeviceSecurityConfig;
use crate::crypto::DeviceKeyPair;
use crate::device::actions::{ActionArguments, ActionKind};
use crate::device::traits::{ActionDispatcher, InnerMessageProcessor, OwnershipAware, SignedActionHandler};
use crate::device::{ActionRequest, VerifiedCaller};
use crate::errors::{ActionError, SecurityError, SecurityResult};
use crate::freshness::envelope;
use crate::freshness::{Anchor, Freshness, SignatureBlock, SignatureKeyInfo, DEVICE_SECURITY_SERVICE_TYPE};
use crate::identity::{security_id, Identity};
use crate::ownership::{OwnerList, DEVICE_SECRET_LEN};
use crate::security::secure_rng::random;
use crate::session::SessionTable;
use crate::storage::{MemoryStateStore, SecurityStateStore};
use crate::tunnel::InnerMessage;

/// Everything guarded by the device lock.
pub(super) struct DeviceState {
    pub(super) owners: OwnerList,
    pub(super) acl: AclTable,
    pub(super) sessions: SessionTable,
    pub(super) lifetime_sequence_base: String,
    pub(super) device_secret: Secret<Vec<u8>>,
    pub(super) catalog: PermissionCatalog,
    pub(super) policy: AccessPolicy,
}

/// Security engine of one device.
///
/// All mutable tables sit behind a single mutex. Signature checks, RSA
/// operations and persistence run outside it; sequence checks, the
/// ownership claim and ACL edits run under it.
pub struct DeviceSecurity {
    pub(super) key_pair: DeviceKeyPair,
    pub(super) identity: Identity,
    pub(super) config: DeviceSecurityConfig,
    pub(super) clock: Box<dyn Clock>,
    pub(super) store: Arc<dyn SecurityStateStore>,
    pub(super) dispatcher: Option<Arc<dyn ActionDispatcher>>,
    pub(super) inner_processor: Option<Arc<dyn InnerMessageProcessor>>,
    pub(super) state: Mutex<DeviceState>,
}

impl DeviceSecurity {
    /// Device with in-memory state only.
    pub fn new(key_pair: DeviceKeyPair, config: DeviceSecurityConfig) -> SecurityResult<Self> {
        Self::with_store(key_pair, config, Arc::new(MemoryStateStore::default()))
    }

    /// Device whose owner list and ACL are loaded from, and saved to, `store`.
    pub fn with_store(
        key_pair: DeviceKeyPair,
        config: DeviceSecurityConfig,
        store: Arc<dyn SecurityStateStore>,
    ) -> SecurityResult<Self> {
        let device_secret = match &config.device_secret {
            Some(encoded) => security_id::decode(encoded)?,
            None => random::bytes(DEVICE_SECRET_LEN)?,
        };

        let mut owners = OwnerList::new(config.owner_list_capacity);
        owners.replace_all(store.load_owners()?)?;
        let mut acl = AclTable::new(config.acl_capacity)?;
        acl.replace_all(store.load_acl()?)?;

        let identity = Identity::from_key(key_pair.public_key());
        info!(
            security_id = %identity.id(),
            owners = owners.len(),
            acl_entries = acl.len(),
            "Device security initialised"
        );

        Ok(DeviceSecurity {
            key_pair,
            identity,
            config,
            clock: Box::new(SystemClock),
            store,
            dispatcher: None,
            inner_processor: None,
            state: Mutex::new(DeviceState {
                owners,
                acl,
                sessions: SessionTable::new(),
                lifetime_sequence_base: random::sequence_base()?,
                device_secret: Secret::new(device_secret),
                catalog: PermissionCatalog::device_security(),
                policy: AccessPolicy::device_security(),
            }),
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the default tunnel behaviour, which feeds inner requests back
    /// through [`DeviceSecurity::handle_http`].
    pub fn with_inner_processor(mut self, processor: Arc<dyn InnerMessageProcessor>) -> Self {
        self.inner_processor = Some(processor);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn security_id(&self) -> &str {
        self.identity.id()
    }

    pub fn key_pair(&self) -> &DeviceKeyPair {
        &self.key_pair
    }

    pub fn config(&self) -> &DeviceSecurityConfig {
        &self.config
    }

    /// Ownership secret in security ID notation, for out-of-band display.
    pub fn device_secret_display(&self) -> SecurityResult<String> {
        let state = self.lock()?;
        security_id::encode(state.device_secret.expose_secret())
            .ok_or_else(|| SecurityError::Internal("device secret has no display form".to_string()))
    }

    pub fn lifetime_sequence_base(&self) -> SecurityResult<String> {
        Ok(self.lock()?.lifetime_sequence_base.clone())
    }

    pub fn acl_version(&self) -> SecurityResult<String> {
        Ok(self.lock()?.acl.version().to_string())
    }

    pub fn acl_entries(&self) -> SecurityResult<Vec<AclEntry>> {
        Ok(self.lock()?.acl.entries().to_vec())
    }

    pub fn session_count(&self) -> SecurityResult<usize> {
        Ok(self.lock()?.sessions.len())
    }

    /// Let another service's ACL tag unlock `actions`.
    pub fn register_permission<I, S>(&self, permission: Permission, actions: I) -> SecurityResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock()?;
        state
            .catalog
            .add_permission_entry(permission, actions.into_iter().map(Into::into));
        Ok(())
    }

    pub fn register_profile(&self, profile: Profile) -> SecurityResult<()> {
        self.lock()?.catalog.add_profile(profile);
        Ok(())
    }

    /// Let `action_name` through without a signature.
    pub fn register_unsigned_action(&self, action_name: impl Into<String>) -> SecurityResult<()> {
        self.lock()?.policy.add_unsigned_action(action_name);
        Ok(())
    }

    /// Verify, authorize and execute one request received on `control_url`.
    pub fn invoke(&self, request: ActionRequest, control_url: &str) -> Result<ActionArguments, ActionError> {
        let action_name = request.action_name.as_str();
        let rejected = |err: SecurityError| {
            debug!(action = %action_name, code = err.code(), reason = %err, "Action rejected");
            ActionError::from(err)
        };

        let caller = self.verify(request.signature.as_ref(), control_url).map_err(rejected)?;
        self.authorize(&caller, action_name).map_err(rejected)?;

        let builtin = match request.service_type.as_deref() {
            None | Some(DEVICE_SECURITY_SERVICE_TYPE) => ActionKind::from_name(action_name),
            Some(_) => None,
        };
        match builtin {
            Some(kind) => self
                .handle_builtin(kind, &caller, &request.arguments)
                .map_err(rejected),
            None => match &self.dispatcher {
                Some(dispatcher) => {
                    debug!(action = %action_name, "Forwarding action");
                    dispatcher.dispatch(caller.identity().as_ref(), action_name, &request.arguments)
                }
                None => Err(rejected(SecurityError::NotImplemented(action_name.to_string()))),
            },
        }
    }

    /// Parse and run a SOAP action envelope.
    pub fn handle_envelope(&self, soap_envelope: &str, control_url: &str) -> Result<ActionArguments, ActionError> {
        let parsed = envelope::parse(soap_envelope)?;
        self.invoke(parsed.into(), control_url)
    }

    /// Answer a complete HTTP control request with a response or fault envelope.
    pub fn handle_http(&self, request: &InnerMessage) -> InnerMessage {
        let answer = request
            .request_target()
            .and_then(|control_url| Ok((control_url, request.body_text()?)))
            .map_err(ActionError::from)
            .and_then(|(control_url, body)| self.answer(body, control_url));
        match answer {
            Ok(response) => InnerMessage::soap_response(200, &response),
            Err(error) => InnerMessage::soap_response(500, &envelope::fault_envelope(&error)),
        }
    }

    fn answer(&self, soap_envelope: &str, control_url: &str) -> Result<String, ActionError> {
        let parsed = envelope::parse(soap_envelope)?;
        let service_type = parsed
            .service_type
            .clone()
            .unwrap_or_else(|| DEVICE_SECURITY_SERVICE_TYPE.to_string());
        let action_name = parsed.action_name.clone();
        let arguments = self.invoke(parsed.into(), control_url)?;
        Ok(envelope::unsigned_envelope(&envelope::response_body(
            &service_type,
            &action_name,
            &arguments,
        )))
    }

    /// Sign a response body with the session's device-to-caller key.
    pub fn sign_response(&self, device_key_id: u32, control_url: &str, action: &str) -> SecurityResult<String> {
        let mut state = self.lock()?;
        let session = state.sessions.get_mut(device_key_id)?;
        let sequence_number = session.next_device_sequence()?;
        let freshness = Freshness::session(session.sequence_base(), sequence_number, control_url);
        envelope::hmac_signed_envelope(
            &freshness,
            session.keys().signing_from_device.expose_secret(),
            device_key_id,
            action,
        )
    }

    /// Forget owners, ACL and sessions and roll the device secret.
    pub fn factory_reset(&self) -> SecurityResult<()> {
        let device_secret = random::bytes(DEVICE_SECRET_LEN)?;
        let lifetime_sequence_base = random::sequence_base()?;
        {
            let mut state = self.lock()?;
            state.owners.clear();
            state.acl.clear()?;
            state.sessions.clear();
            state.device_secret = Secret::new(device_secret);
            state.lifetime_sequence_base = lifetime_sequence_base;
        }
        self.persist_owners(&[]);
        self.persist_acl(&[]);
        warn!(security_id = %self.identity.id(), "Security state reset to factory defaults");
        Ok(())
    }

    pub(super) fn lock(&self) -> SecurityResult<MutexGuard<'_, DeviceState>> {
        self.state
            .lock()
            .map_err(|_| SecurityError::Internal("device state lock poisoned".to_string()))
    }

    /// Check the signature block, if any, and consume its freshness.
    fn verify(&self, signature: Option<&SignatureBlock>, control_url: &str) -> SecurityResult<VerifiedCaller> {
        let Some(block) = signature else {
            return Ok(VerifiedCaller::Unsigned);
        };
        if block.freshness.control_url != control_url {
            debug!(expected = %control_url, got = %block.freshness.control_url, "Freshness names another control URL");
            return Err(SecurityError::AuthenticationFailed);
        }

        match (&block.key_info, &block.freshness.anchor) {
            (SignatureKeyInfo::PublicKey(_), Anchor::Lifetime(base)) => {
                let key = block.verify_rsa()?.clone();
                if *base != self.lock()?.lifetime_sequence_base {
                    return Err(SecurityError::ReplayDetected);
                }
                Ok(VerifiedCaller::PublicKey(key))
            }
            (
                SignatureKeyInfo::KeyName(device_key_id),
                Anchor::Session {
                    sequence_base,
                    sequence_number,
                },
            ) => {
                let mut state = self.lock()?;
                let session = state.sessions.get_mut(*device_key_id)?;
                block.verify_hmac(session.keys().signing_to_device.expose_secret())?;
                session.accept_cp_sequence(sequence_base, *sequence_number)?;
                Ok(VerifiedCaller::Session {
                    device_key_id: *device_key_id,
                    caller_public_key: session.caller_public_key().cloned(),
                })
            }
            _ => Err(SecurityError::AuthenticationFailed),
        }
    }

    fn authorize(&self, caller: &VerifiedCaller, action_name: &str) -> SecurityResult<()> {
        let identity = caller.identity();
        let now = self.clock.now_string();
        let state = self.lock()?;
        if !caller.is_signed() && !state.policy.is_unsigned(action_name) {
            return Err(SecurityError::SignatureMissing);
        }

        let authorizer = Authorizer {
            policy: &state.policy,
            owners: &state.owners,
            acl: &state.acl,
            catalog: &state.catalog,
        };
        if authorizer.is_permitted(identity.as_ref(), action_name, &now) {
            Ok(())
        } else {
            Err(SecurityError::AuthorizationDenied(action_name.to_string()))
        }
    }

    /// Run an inner tunnel request.
    pub(super) fn process_inner(&self, request: InnerMessage) -> SecurityResult<InnerMessage> {
        match &self.inner_processor {
            Some(processor) => processor.process(request),
            None => Ok(self.handle_http(&request)),
        }
    }

    pub(super) fn persist_owners(&self, owners: &[Identity]) {
        if let Err(err) = self.store.save_owners(owners) {
            warn!(error = %err, "Failed to persist owner list");
        }
    }

    pub(super) fn persist_acl(&self, entries: &[AclEntry]) {
        if let Err(err) = self.store.save_acl(entries) {
            warn!(error = %err, "Failed to persist ACL");
        }
    }
}

impl SignedActionHandler for DeviceSecurity {
    fn handle_signed(&self, soap_envelope: &str, control_url: &str) -> Result<ActionArguments, ActionError> {
        self.handle_envelope(soap_envelope, control_url)
    }
}

impl OwnershipAware for DeviceSecurity {
    fn is_owned(&self) -> bool {
        self.lock().map_or(false, |state| !state.owners.is_empty())
    }

    fn owners(&self) -> Vec<Identity> {
        self.lock()
            .map(|state| state.owners.owners().to_vec())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for DeviceSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSecurity")
            .field("security_id", &self.identity.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::FixedClock;
    use crate::control_point::ControlPoint;
    use crate::crypto::public_key::test_keys;
    use crate::device::actions::arg;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONTROL_URL: &str = "/upnp/control/DeviceSecurity";

    fn device() -> DeviceSecurity {
        DeviceSecurity::new(test_keys::key(0), DeviceSecurityConfig::default())
            .expect("Should create device")
            .with_clock(FixedClock("2024-06-01T12:00:00Z".to_string()))
    }

    fn signed(device: &DeviceSecurity, caller: &ControlPoint, action: &str, arguments: &ActionArguments) -> String {
        caller
            .rsa_signed_request(
                &device.lifetime_sequence_base().expect("Should read base"),
                CONTROL_URL,
                DEVICE_SECURITY_SERVICE_TYPE,
                action,
                arguments,
            )
            .expect("Should sign request")
    }

    fn take_ownership(device: &DeviceSecurity, caller: &ControlPoint) -> Result<ActionArguments, ActionError> {
        let secret = security_id::decode(&device.device_secret_display().expect("Should display secret"))
            .expect("Should decode secret");
        let claim = caller
            .ownership_claim(
                device.key_pair().public_key(),
                &secret,
                &device.lifetime_sequence_base().expect("Should read base"),
            )
            .expect("Should build claim");
        device.handle_envelope(&signed(device, caller, "TakeOwnership", &claim), CONTROL_URL)
    }

    #[test]
    fn test_unsigned_discovery() {
        let device = device();
        let request = ControlPoint::unsigned_request(
            DEVICE_SECURITY_SERVICE_TYPE,
            "GetPublicKeys",
            &ActionArguments::new(),
        );
        let response = device.handle_envelope(&request, CONTROL_URL).expect("Should answer");
        let keys = response.get(arg::KEY_ARG).expect("Should carry keys");
        assert!(keys.starts_with("<Keys><Confidentiality><RSAKeyValue>"));
        assert_eq!(
            &crate::crypto::public_key::parse_public_key_xml(keys).expect("Should parse key"),
            device.key_pair().public_key()
        );
    }

    #[test]
    fn test_unsigned_request_for_signed_action() {
        let device = device();
        let request = ControlPoint::unsigned_request(DEVICE_SECURITY_SERVICE_TYPE, "ReadACL", &ActionArguments::new());
        assert_eq!(device.handle_envelope(&request, CONTROL_URL).unwrap_err().code, 712);
    }

    #[test]
    fn test_signature_bound_to_control_url_and_base() {
        let device = device();
        let caller = ControlPoint::new(test_keys::key(1));
        let request = signed(&device, &caller, "GetLifetimeSequenceBase", &ActionArguments::new());

        assert_eq!(device.handle_envelope(&request, "/elsewhere").unwrap_err().code, 711);
        assert!(device.handle_envelope(&request, CONTROL_URL).is_ok());

        let stale = caller
            .rsa_signed_request("stale", CONTROL_URL, DEVICE_SECURITY_SERVICE_TYPE, "GetLifetimeSequenceBase", &ActionArguments::new())
            .expect("Should sign request");
        assert_eq!(device.handle_envelope(&stale, CONTROL_URL).unwrap_err().code, 714);
    }

    #[test]
    fn test_take_ownership_rolls_lifetime_base() {
        let device = device();
        let caller = ControlPoint::new(test_keys::key(1));
        let before = device.lifetime_sequence_base().expect("Should read base");

        take_ownership(&device, &caller).expect("Should take ownership");
        assert!(device.is_owned());
        assert!(device.is_owner(caller.identity()));
        assert_ne!(device.lifetime_sequence_base().expect("Should read base"), before);

        let intruder = ControlPoint::new(test_keys::key(2));
        assert_eq!(take_ownership(&device, &intruder).unwrap_err().code, 761);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let device = device();
        let caller = ControlPoint::new(test_keys::key(1));
        let claim = caller
            .ownership_claim(
                device.key_pair().public_key(),
                b"0123456789",
                &device.lifetime_sequence_base().expect("Should read base"),
            )
            .expect("Should build claim");
        let error = device
            .handle_envelope(&signed(&device, &caller, "TakeOwnership", &claim), CONTROL_URL)
            .unwrap_err();
        assert_eq!(error.code, 762);
        assert!(!device.is_owned());
    }

    #[test]
    fn test_unimplemented_actions_after_authorization() {
        let device = device();
        let owner = ControlPoint::new(test_keys::key(1));
        take_ownership(&device, &owner).expect("Should take ownership");

        for action in ["CacheCertificate", "SetTimeHint", "WriteACL", "ReplaceACLEntry", "FactorySecurityReset"] {
            let request = signed(&device, &owner, action, &ActionArguments::new());
            assert_eq!(device.handle_envelope(&request, CONTROL_URL).unwrap_err().code, 602, "{}", action);
        }
        assert!(device.is_owned());

        let stranger = ControlPoint::new(test_keys::key(2));
        let request = signed(&device, &stranger, "WriteACL", &ActionArguments::new());
        assert_eq!(device.handle_envelope(&request, CONTROL_URL).unwrap_err().code, 701);
    }

    #[test]
    fn test_external_actions_reach_dispatcher() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let dispatcher = move |caller: Option<&Identity>, action: &str, arguments: &ActionArguments| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(caller.is_none());
            assert_eq!(action, "GetStatus");
            Ok::<_, ActionError>(arguments.clone().with("Status", "on"))
        };
        let device = device().with_dispatcher(Arc::new(dispatcher));

        let request = ControlPoint::unsigned_request("urn:x:service:Switch:1", "GetStatus", &ActionArguments::new());
        assert_eq!(device.handle_envelope(&request, "/switch").unwrap_err().code, 712);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        device.register_unsigned_action("GetStatus").expect("Should register");
        let response = device.handle_envelope(&request, "/switch").expect("Should dispatch");
        assert_eq!(response.get("Status").expect("Should carry status"), "on");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_permission_grants_external_action() {
        let device = device();
        let owner = ControlPoint::new(test_keys::key(1));
        let user = ControlPoint::new(test_keys::key(2));
        take_ownership(&device, &owner).expect("Should take ownership");
        device
            .register_permission(
                Permission::new("Switch.Operate", "<mfgr:operate/>", "", "Operate the switch"),
                ["SetTarget"],
            )
            .expect("Should register");

        let dispatcher = |_: Option<&Identity>, _: &str, _: &ActionArguments| Ok::<_, ActionError>(ActionArguments::new());
        let device = device.with_dispatcher(Arc::new(dispatcher));
        let set_target = |device: &DeviceSecurity| {
            let request = user
                .rsa_signed_request(
                    &device.lifetime_sequence_base().expect("Should read base"),
                    "/switch",
                    "urn:x:service:Switch:1",
                    "SetTarget",
                    &ActionArguments::new().with("NewTargetValue", "1"),
                )
                .expect("Should sign request");
            device.handle_envelope(&request, "/switch")
        };
        assert_eq!(set_target(&device).unwrap_err().code, 701);

        let entry = AclEntry::new(crate::acl::Subject::Identity(user.identity().clone()), "<mfgr:operate/>");
        let add = signed(&device, &owner, "AddACLEntry", &ActionArguments::new().with(arg::ENTRY, entry.to_xml()));
        device.handle_envelope(&add, CONTROL_URL).expect("Should add entry");
        set_target(&device).expect("Should be permitted");
    }

    #[test]
    fn test_factory_reset_clears_state() {
        let device = device();
        let owner = ControlPoint::new(test_keys::key(1));
        let secret_before = device.device_secret_display().expect("Should display secret");
        take_ownership(&device, &owner).expect("Should take ownership");

        device.factory_reset().expect("Should reset");
        assert!(!device.is_owned());
        assert!(device.acl_entries().expect("Should read ACL").is_empty());
        assert_ne!(device.device_secret_display().expect("Should display secret"), secret_before);
        take_ownership(&device, &owner).expect("Should take ownership again");
    }
}
