use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Create `dir` (and parents) if absent and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Newest modification time of `dir` itself or anything beneath it.
///
/// Entries that vanish mid-walk are ignored.
pub fn newest_mtime(dir: &Path) -> io::Result<SystemTime> {
    let mut newest = fs::metadata(dir)?.modified()?;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if let Ok(modified) = meta.modified()
                && modified > newest
            {
                newest = modified;
            }
            if meta.is_dir() {
                pending.push(entry.path());
            }
        }
    }

    Ok(newest)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn newest_mtime_sees_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");
        let file = nested.join("av_clip.mp4");
        fs::write(&file, b"x").expect("write");

        let future = SystemTime::now() + Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&file)
            .and_then(|f| f.set_modified(future))
            .expect("set mtime");

        let newest = newest_mtime(dir.path()).expect("mtime");
        assert_eq!(newest, future);
    }

    #[test]
    fn newest_mtime_of_missing_dir_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = newest_mtime(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn private_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join("raw").join("session");
        ensure_private_dir(&raw).expect("create");
        let mode = fs::metadata(&raw).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}
