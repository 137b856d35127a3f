//! Device security for UPnP-style action invocation.
//!
//! A [`device::DeviceSecurity`] sits between the transport and the services
//! of a device. It authenticates callers by RSA signature or session HMAC,
//! rejects stale or replayed requests, decides access from the owner list
//! and the ACL, and unwraps requests tunnelled through `DecryptAndExecute`.
//! [`control_point`] holds the matching caller side.

pub mod acl;
pub mod authorization;
pub mod config;
pub mod control_point;
pub mod crypto;
pub mod device;
pub mod errors;
pub mod freshness;
pub mod identity;
pub mod logging;
pub mod ownership;
pub mod security;
pub mod session;
pub mod storage;
pub mod tunnel;
mod xml;

pub use config::DeviceSecurityConfig;
pub use control_point::{ControlPoint, ControlPointSession};
pub use device::{ActionArguments, ActionKind, ActionRequest, DeviceSecurity, VerifiedCaller};
pub use errors::{ActionError, SecurityError, SecurityResult};
pub use identity::Identity;
