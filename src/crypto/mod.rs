pub mod digest;
pub mod public_key;
pub mod symmetric;

pub use public_key::DeviceKeyPair;

/// Hash algorithm tag used for identities and owner entries.
pub const HASH_ALGORITHM_SHA1: &str = "SHA1";
/// Signing algorithm for session signatures and the ownership claim.
pub const SIGNING_ALGORITHM_HMAC_SHA1: &str = "SHA1-HMAC";
/// Accepted spelling variant of [`SIGNING_ALGORITHM_HMAC_SHA1`].
pub const SIGNING_ALGORITHM_HMAC_SHA1_ALIAS: &str = "HMAC-SHA1";
/// Bulk cipher for session bundles and the tunnel.
pub const BULK_ALGORITHM_AES_128_CBC: &str = "AES-128-CBC";

pub fn is_hmac_sha1(algorithm: &str) -> bool {
    algorithm == SIGNING_ALGORITHM_HMAC_SHA1 || algorithm == SIGNING_ALGORITHM_HMAC_SHA1_ALIAS
}
