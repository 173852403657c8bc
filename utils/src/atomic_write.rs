//! Crash-safe file persistence.
//!
//! Bytes land in a sibling temp file which is synced and then renamed over
//! the target, so readers never observe a half-written upload.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Owner-only mode for every persisted file. Uploads are biometric data.
#[cfg(unix)]
const OWNER_ONLY: u32 = 0o600;

/// Write `bytes` into an owner-only, synced temp file inside `dir`.
///
/// The file is removed when the handle drops; `persist` renames it into
/// place. Lets callers do the slow write before taking any lock and keep
/// only the rename inside it.
pub fn stage_bytes(dir: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut staged = tempfile::Builder::new()
        .prefix(".staged-")
        .tempfile_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(OWNER_ONLY))?;
    }
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

/// Write `bytes` to `path` through a temp file in the same directory.
///
/// The parent directory must already exist. An existing file at `path` is
/// replaced.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    stage_bytes(parent, bytes)?.persist(path).map_err(|err| {
        tracing::debug!(path = %path.display(), error = %err.error, "rename into place failed");
        err.error
    })?;
    Ok(())
}
