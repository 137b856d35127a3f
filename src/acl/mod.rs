pub mod clock;
pub mod entry;
pub mod permissions;
pub mod table;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entry::{AclEntry, Subject};
pub use permissions::{Permission, PermissionCatalog, Profile};
pub use table::AclTable;
