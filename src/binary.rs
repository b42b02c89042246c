//! Locating the rclone executable.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::RcloneError;

#[cfg(windows)]
const EXE_NAME: &str = "rclone.exe";
#[cfg(not(windows))]
const EXE_NAME: &str = "rclone";

/// Find the rclone binary by searching `PATH`.
pub fn find_rclone() -> Result<PathBuf, RcloneError> {
    let path = env::var_os("PATH").ok_or(RcloneError::NotFound)?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(EXE_NAME);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(RcloneError::NotFound)
}

pub(crate) fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_rclone_does_not_panic() {
        // Depends on the host; either outcome is valid.
        let _ = find_rclone();
    }

    #[cfg(unix)]
    #[test]
    fn test_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rclone");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o644);
        std::fs::set_permissions(&path, perms.clone()).unwrap();
        assert!(!is_executable(&path));

        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        assert!(is_executable(&path));
    }

    #[test]
    fn test_is_executable_missing_file() {
        assert!(!is_executable(Path::new("/nonexistent/rclone")));
    }
}
