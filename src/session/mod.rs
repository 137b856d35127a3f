pub mod keys;
pub mod manager;

pub use keys::{SessionKeys, WrappedSessionKeys};
pub use manager::{Session, SessionTable};
