pub mod key_identity;
pub mod security_id;

pub use key_identity::{HashAlgorithm, Identity};
