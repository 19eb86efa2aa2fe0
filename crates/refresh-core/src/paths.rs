use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REFRESH_DIR: &str = ".refresh";
pub const CONFIG_FILE: &str = ".refresh/config.yaml";
pub const DB_FILE: &str = ".refresh/refresh.db";
pub const RECIPIENTS_FILE: &str = ".refresh/recipients.txt";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn refresh_dir(root: &Path) -> PathBuf {
    root.join(REFRESH_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn recipients_path(root: &Path) -> PathBuf {
    root.join(RECIPIENTS_FILE)
}

/// `true` when `root` has been set up with `refresh init`.
pub fn is_initialized(root: &Path) -> bool {
    config_path(root).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_under_refresh_dir() {
        let root = Path::new("/srv/fleet");
        assert_eq!(config_path(root), PathBuf::from("/srv/fleet/.refresh/config.yaml"));
        assert_eq!(db_path(root), PathBuf::from("/srv/fleet/.refresh/refresh.db"));
        assert!(recipients_path(root).starts_with(refresh_dir(root)));
    }

    #[test]
    fn uninitialized_root_is_detected() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
