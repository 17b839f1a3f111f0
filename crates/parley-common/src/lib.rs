//! Shared types and directory management for Parley
//!
//! Directory layout:
//! ```text
//! parley_data/
//! ├── users.sqlite      # Accounts and bearer sessions
//! ├── directory.json    # Conversation index
//! └── messages/         # One message file per conversation
//! ```

pub mod events;
pub mod models;

pub use events::{ClientEvent, EventError, LiveMessageRef, ServerEvent};
pub use models::{ConversationId, ConversationView, MessageId, MessageView, UserId, UserInfo};

use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides the data root.
pub const ROOT_ENV: &str = "PARLEY_ROOT";

/// Get the data root from environment or default
pub fn parley_root() -> PathBuf {
    std::env::var(ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("parley_data"))
}

/// Accounts database inside a data root
pub fn users_db_path(root: &Path) -> PathBuf {
    root.join("users.sqlite")
}

/// Conversation index inside a data root
pub fn directory_snapshot_path(root: &Path) -> PathBuf {
    root.join("directory.json")
}

/// Ensure a single directory exists
pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted() {
        let root = PathBuf::from("/tmp/parley-root");
        assert_eq!(users_db_path(&root), root.join("users.sqlite"));
        assert_eq!(directory_snapshot_path(&root), root.join("directory.json"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Second call is a no-op
        ensure_dir(&nested).unwrap();
    }
}
