//! Permission hardening for directories this crate creates.

use crate::error::{Result, SafeFsError};
use std::path::Path;

/// Restricts a directory to its owner (Unix only).
///
/// `display` is the caller-facing relative path used in error messages.
pub fn set_owner_only_permissions(path: &Path, display: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(path, perms).map_err(|e| SafeFsError::io(display, e))?;
    }

    #[cfg(not(unix))]
    {
        // No mode bits to set; the directory must still exist
        if !path.is_dir() {
            return Err(SafeFsError::NotFound {
                path: display.to_string(),
            });
        }
    }

    Ok(())
}
