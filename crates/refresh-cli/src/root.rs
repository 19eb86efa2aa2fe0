use std::path::{Path, PathBuf};

use refresh_core::paths::REFRESH_DIR;

/// Resolve the workspace root.
///
/// An explicit `--root` / `REFRESH_ROOT` wins. Otherwise walk upward from
/// the current directory looking for `.refresh/`, falling back to the
/// current directory so `refresh init` has somewhere to write.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or(cwd)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(REFRESH_DIR).is_dir())
        .map(Path::to_path_buf)
}
