//! Owner-only files written without ever exposing a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use passgate_core::Error;
use tracing::debug;

pub const PRIVATE_DIR_MODE: u32 = 0o700;
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Create `dir` (and parents) and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    restrict(dir, PRIVATE_DIR_MODE)
}

/// Replace `path` with `data`: write a sibling temp file, flush it to disk, then rename.
///
/// Readers see either the old contents or the new ones. The temp file is removed on failure.
pub fn write_private_atomic(path: &Path, data: &[u8]) -> Result<(), Error> {
    let tmp_path = temp_path(path);
    let written = write_synced(&tmp_path, data).and_then(|()| {
        fs::rename(&tmp_path, path)?;
        Ok(())
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written?;
    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> Result<(), Error> {
    let mut file = create_private(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn create_private(path: &Path) -> Result<File, Error> {
    use std::os::unix::fs::OpenOptionsExt;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)?;
    // `mode` only applies to new files; a stale temp file keeps whatever it had.
    restrict(path, PRIVATE_FILE_MODE)?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> Result<File, Error> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");

        write_private_atomic(&path, b"first").unwrap();
        write_private_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("credentials.enc.tmp").exists());
    }

    #[test]
    fn test_failed_write_keeps_old_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        write_private_atomic(&path, b"original").unwrap();

        // A directory in the way of the temp file makes the write fail.
        fs::create_dir(dir.path().join("credentials.enc.tmp")).unwrap();
        assert!(write_private_atomic(&path, b"replacement").is_err());

        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[cfg(unix)]
    #[test]
    fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        ensure_private_dir(&data_dir).unwrap();
        let path = data_dir.join("salt.bin");
        write_private_atomic(&path, &[0u8; 32]).unwrap();

        let dir_mode = fs::metadata(&data_dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, PRIVATE_DIR_MODE);
        assert_eq!(file_mode, PRIVATE_FILE_MODE);
    }
}
