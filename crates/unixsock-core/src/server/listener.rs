use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use tokio::net::UnixListener;

use crate::{Error, Result};

/// Longest path that fits in `sockaddr_un.sun_path`, NUL terminator included
#[cfg(target_os = "linux")]
const MAX_SOCKET_PATH: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_SOCKET_PATH: usize = 104;

const DIR_MODE: u32 = 0o755;

/// Reject paths that can never be bound
pub(crate) fn validate_path(path: &Path) -> Result<()> {
    let raw = path.as_os_str().as_bytes();
    if raw.ends_with(b"/") || path.file_name().is_none() {
        return Err(Error::InvalidPath(format!(
            "{} has no file name",
            path.display()
        )));
    }
    if raw.len() >= MAX_SOCKET_PATH {
        return Err(Error::InvalidPath(format!(
            "{} is {} bytes, max {}",
            path.display(),
            raw.len(),
            MAX_SOCKET_PATH - 1
        )));
    }
    Ok(())
}

/// Create the parent directory if needed and bind a listener at `path`
pub(crate) fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(parent)
            .map_err(|e| Error::bind(path, e))?;
    }

    UnixListener::bind(path).map_err(|e| Error::bind(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_validate_rejects_directory_paths() {
        assert!(matches!(validate_path(Path::new("/")), Err(Error::InvalidPath(_))));
        assert!(matches!(validate_path(Path::new("run/")), Err(Error::InvalidPath(_))));
        assert!(matches!(validate_path(Path::new("run/..")), Err(Error::InvalidPath(_))));
        assert!(validate_path(Path::new("server.sock")).is_ok());
        assert!(validate_path(Path::new("/tmp/app/server.sock")).is_ok());
    }

    #[test]
    fn test_validate_rejects_overlong_paths() {
        let long = format!("/tmp/{}.sock", "x".repeat(MAX_SOCKET_PATH));
        let err = validate_path(Path::new(&long)).unwrap_err();
        assert!(err.to_string().contains("bytes"));
    }

    #[tokio::test]
    async fn test_bind_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("server.sock");

        let _listener = bind(&path).unwrap();

        assert!(path.exists());
        let meta = std::fs::metadata(dir.path().join("a")).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777 & !DIR_MODE, 0);
    }

    #[tokio::test]
    async fn test_bind_over_live_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sock");
        let _first = bind(&path).unwrap();

        let err = bind(&path).unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }
}
