use crate::acl::entry::{self, AclEntry};
use crate::acl::permissions::PermissionCatalog;
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::Identity;
use crate::security::secure_rng::random;

/// Bounded, ordered ACL. Every mutation moves the table to a fresh opaque
/// version string; index-based edits must name the version they were
/// computed against.
#[derive(Debug, Clone)]
pub struct AclTable {
    entries: Vec<AclEntry>,
    capacity: usize,
    version: String,
}

impl AclTable {
    pub fn new(capacity: usize) -> SecurityResult<Self> {
        Ok(AclTable {
            entries: Vec::new(),
            capacity,
            version: random::sequence_base()?,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_size(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Append `entry`; returns the new version.
    pub fn add(&mut self, entry: AclEntry) -> SecurityResult<&str> {
        if self.entries.len() >= self.capacity {
            return Err(SecurityError::CapacityExceeded("ACL"));
        }
        self.entries.push(entry);
        self.bump_version()
    }

    /// Remove the entry at `index`. The version is checked before the index.
    pub fn remove(&mut self, target_version: &str, index: usize) -> SecurityResult<AclEntry> {
        self.check_target(target_version, index)?;
        let removed = self.entries.remove(index);
        self.bump_version()?;
        Ok(removed)
    }

    /// Swap the entry at `index` for `entry`; returns the new version.
    pub fn replace(
        &mut self,
        target_version: &str,
        index: usize,
        entry: AclEntry,
    ) -> SecurityResult<&str> {
        self.check_target(target_version, index)?;
        self.entries[index] = entry;
        self.bump_version()
    }

    /// Install a complete entry list, e.g. one restored from a state store.
    pub fn replace_all(&mut self, entries: Vec<AclEntry>) -> SecurityResult<()> {
        if entries.len() > self.capacity {
            return Err(SecurityError::CapacityExceeded("ACL"));
        }
        self.entries = entries;
        self.bump_version()?;
        Ok(())
    }

    pub fn clear(&mut self) -> SecurityResult<()> {
        self.replace_all(Vec::new())
    }

    /// First entry, in stored order, granting `action_name` to `identity` at `now`.
    pub fn first_match(
        &self,
        identity: &Identity,
        action_name: &str,
        now: &str,
        catalog: &PermissionCatalog,
    ) -> Option<(usize, &AclEntry)> {
        self.entries.iter().enumerate().find(|(_, entry)| {
            entry.subject.matches(identity)
                && entry.is_valid_at(now)
                && catalog.is_associated_action(&entry.permission, action_name)
        })
    }

    pub fn to_xml(&self) -> String {
        entry::entries_to_xml(&self.entries)
    }

    fn check_target(&self, target_version: &str, index: usize) -> SecurityResult<()> {
        if target_version != self.version {
            return Err(SecurityError::AclVersionConflict);
        }
        if index >= self.entries.len() {
            return Err(SecurityError::NoSuchAclEntry(index));
        }
        Ok(())
    }

    fn bump_version(&mut self) -> SecurityResult<&str> {
        self.version = random::sequence_base()?;
        Ok(&self.version)
    }
}
