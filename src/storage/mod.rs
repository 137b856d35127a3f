//! Durable owner list and ACL.
//!
//! The device engine owns no I/O; it loads a snapshot through a
//! [`SecurityStateStore`] at construction and hands one back after every
//! successful ownership or ACL change.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::acl::entry::{self, AclEntry};
use crate::identity::Identity;
use crate::ownership;

pub trait SecurityStateStore: Send + Sync {
    fn load_owners(&self) -> Result<Vec<Identity>>;
    fn save_owners(&self, owners: &[Identity]) -> Result<()>;
    fn load_acl(&self) -> Result<Vec<AclEntry>>;
    fn save_acl(&self, entries: &[AclEntry]) -> Result<()>;
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    owners: Mutex<Vec<Identity>>,
    acl: Mutex<Vec<AclEntry>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("State store lock poisoned")
}

impl SecurityStateStore for MemoryStateStore {
    fn load_owners(&self) -> Result<Vec<Identity>> {
        Ok(self.owners.lock().map_err(poisoned)?.clone())
    }

    fn save_owners(&self, owners: &[Identity]) -> Result<()> {
        *self.owners.lock().map_err(poisoned)? = owners.to_vec();
        Ok(())
    }

    fn load_acl(&self) -> Result<Vec<AclEntry>> {
        Ok(self.acl.lock().map_err(poisoned)?.clone())
    }

    fn save_acl(&self, entries: &[AclEntry]) -> Result<()> {
        *self.acl.lock().map_err(poisoned)? = entries.to_vec();
        Ok(())
    }
}

const OWNERS_FILE: &str = "owners.xml";
const ACL_FILE: &str = "acl.xml";

/// Stores `owners.xml` (`<Owners>`) and `acl.xml` (`<acl>`) in one directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    directory: PathBuf,
}

impl FileStateStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).context("Failed to create state directory")?;
        Ok(FileStateStore { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.directory.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        if data.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn write(&self, name: &str, data: &str) -> Result<()> {
        let path = self.directory.join(name);
        let staging = path.with_extension("xml.tmp");
        fs::write(&staging, data).with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(path = %path.display(), "Saved security state");
        Ok(())
    }
}

impl SecurityStateStore for FileStateStore {
    fn load_owners(&self) -> Result<Vec<Identity>> {
        match self.read(OWNERS_FILE)? {
            Some(data) => Identity::parse_all(&data).context("Failed to parse owner list"),
            None => Ok(Vec::new()),
        }
    }

    fn save_owners(&self, owners: &[Identity]) -> Result<()> {
        self.write(OWNERS_FILE, &ownership::owners_to_xml(owners))
    }

    fn load_acl(&self) -> Result<Vec<AclEntry>> {
        match self.read(ACL_FILE)? {
            Some(data) => entry::parse_entries(&data).context("Failed to parse ACL"),
            None => Ok(Vec::new()),
        }
    }

    fn save_acl(&self, entries: &[AclEntry]) -> Result<()> {
        self.write(ACL_FILE, &entry::entries_to_xml(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Subject;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStateStore::new(temp_dir.path().join("state")).expect("Failed to create store");
        (store, temp_dir)
    }

    fn sample_entries() -> Vec<AclEntry> {
        vec![
            AclEntry::new(Subject::Any, "<mfgr:trusted/>"),
            AclEntry::new(Subject::Identity(Identity::from_key_xml("editor")), "<mfgr:aclEditor/>")
                .with_validity(Some("2024-01-01T00:00:00Z".into()), None),
        ]
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.load_owners().expect("Should load owners").is_empty());
        assert!(store.load_acl().expect("Should load ACL").is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let (store, _temp_dir) = create_test_store();
        let owners = vec![Identity::from_key_xml("a"), Identity::from_key_xml("b")];
        store.save_owners(&owners).expect("Should save owners");
        store.save_acl(&sample_entries()).expect("Should save ACL");

        let reopened = FileStateStore::new(store.directory()).expect("Should reopen store");
        assert_eq!(reopened.load_owners().expect("Should load owners"), owners);
        assert_eq!(reopened.load_acl().expect("Should load ACL"), sample_entries());
        assert!(fs::read_to_string(store.directory().join(OWNERS_FILE))
            .expect("Should read owners file")
            .starts_with("<Owners><hash>"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.directory().join(ACL_FILE), "<acl><entry>").expect("Should write file");
        assert!(store.load_acl().is_err());
    }

    #[test]
    fn test_memory_store_keeps_last_snapshot() {
        let store = MemoryStateStore::default();
        store.save_owners(&[Identity::from_key_xml("a")]).expect("Should save owners");
        store.save_owners(&[]).expect("Should save owners");
        assert!(store.load_owners().expect("Should load owners").is_empty());
        store.save_acl(&sample_entries()).expect("Should save ACL");
        assert_eq!(store.load_acl().expect("Should load ACL").len(), 2);
    }
}
