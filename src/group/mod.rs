//! Group membership.
//!
//! The master founds the group and publishes its identifier in the
//! workspace; workers join with that identifier and keep their membership
//! alive by pinging. Membership changes surface as joined/left/died events
//! through [`MembershipListener`].

pub mod master;
pub mod member;

pub use master::{Group, GroupService};
pub use member::GroupMembership;

use crate::common::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const FLAMESTORE_DIR: &str = ".flamestore";
pub const GROUP_FILE: &str = "group.ssg";
pub const MASTER_ID_FILE: &str = "master.ssg.id";

/// Member id of the founding master.
pub const MASTER_MEMBER_ID: u64 = 0;

/// Observer of membership changes, installed by the master.
#[async_trait]
pub trait MembershipListener: Send + Sync {
    async fn on_joined(&self, member_id: u64, addr: &str);
    async fn on_left(&self, member_id: u64);
    async fn on_died(&self, member_id: u64);
}

/// Contents of the published group identifier file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupFile {
    pub group: Uuid,
    pub master: String,
}

pub fn group_dir(workspace: &Path) -> PathBuf {
    workspace.join(FLAMESTORE_DIR)
}

/// Publish the group identifier and the master's member id into the
/// workspace, creating the directory if needed.
pub fn publish(workspace: &Path, file: &GroupFile) -> Result<()> {
    let dir = group_dir(workspace);
    std::fs::create_dir_all(&dir).map_err(|e| {
        Error::Group(format!("could not create workspace dir {}: {}", dir.display(), e))
    })?;
    let payload = serde_json::to_string_pretty(file)
        .map_err(|e| Error::Group(format!("could not encode group file: {}", e)))?;
    std::fs::write(dir.join(GROUP_FILE), payload)?;
    std::fs::write(dir.join(MASTER_ID_FILE), MASTER_MEMBER_ID.to_string())?;
    tracing::debug!(workspace = %workspace.display(), "group files published");
    Ok(())
}

pub fn load_group_file(workspace: &Path) -> Result<GroupFile> {
    let path = group_dir(workspace).join(GROUP_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Group(format!("could not open group file {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Group(format!("malformed group file {}: {}", path.display(), e)))
}

pub fn load_master_id(workspace: &Path) -> Result<u64> {
    let path = group_dir(workspace).join(MASTER_ID_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Group(format!("could not open master id file {}: {}", path.display(), e)))?;
    content
        .trim()
        .parse()
        .map_err(|e| Error::Group(format!("malformed master id file {}: {}", path.display(), e)))
}

/// Withdraw the published files. Missing files are not an error.
pub fn unpublish(workspace: &Path) -> Result<()> {
    for name in [GROUP_FILE, MASTER_ID_FILE] {
        match std::fs::remove_file(group_dir(workspace).join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = GroupFile {
            group: Uuid::new_v4(),
            master: "http://127.0.0.1:8650".to_owned(),
        };
        publish(dir.path(), &file).unwrap();
        assert_eq!(load_group_file(dir.path()).unwrap(), file);
        assert_eq!(load_master_id(dir.path()).unwrap(), MASTER_MEMBER_ID);
    }

    #[test]
    fn test_load_without_publish_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_group_file(dir.path()).is_err());
        assert!(load_master_id(dir.path()).is_err());
    }

    #[test]
    fn test_unpublish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = GroupFile {
            group: Uuid::new_v4(),
            master: "http://127.0.0.1:8650".to_owned(),
        };
        publish(dir.path(), &file).unwrap();
        unpublish(dir.path()).unwrap();
        unpublish(dir.path()).unwrap();
        assert!(load_group_file(dir.path()).is_err());
    }
}
