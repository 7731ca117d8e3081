//! Filesystem layout for a supervisor's data root.
//!
//! Mirrors `ocr::model_utils::ModelDirConfig::default_dir`'s `dirs`-based resolution
//! chain and `privacy::ctor::CTorHiddenService::start`'s habit of creating directories
//! with owner-only permissions before Tor touches them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FsError;

/// Resolved locations of every directory and file this crate owns under one root.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Use `root` as the application root, or fall back to the platform data
    /// directory (`dirs::data_dir()/torman`) when `root` is `None`.
    pub fn new(root: Option<PathBuf>) -> Self {
        let root = root.unwrap_or_else(Self::default_root);
        Self { root }
    }

    fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("torman")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn binaries_dir(&self) -> PathBuf {
        self.root.join("binaries")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn hidden_services_dir(&self) -> PathBuf {
        self.root.join("hidden_services")
    }

    pub fn hidden_service_dir(&self, n: u64) -> PathBuf {
        self.hidden_services_dir().join(format!("hs_{n}"))
    }

    pub fn torrc_path(&self) -> PathBuf {
        self.root.join("torrc")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("torman.lock")
    }

    #[cfg(windows)]
    pub fn tor_binary_path(&self) -> PathBuf {
        self.binaries_dir().join("tor.exe")
    }

    #[cfg(not(windows))]
    pub fn tor_binary_path(&self) -> PathBuf {
        self.binaries_dir().join("tor")
    }

    /// Create every directory this root owns, idempotently. Directories that will
    /// hold hidden-service key material are created `0o700` on Unix.
    pub fn ensure(&self) -> Result<(), FsError> {
        create_dir_all(&self.root)?;
        create_dir_all(&self.binaries_dir())?;
        create_dir_all(&self.cache_dir())?;
        create_dir_private(&self.data_dir())?;
        create_dir_private(&self.hidden_services_dir())?;
        Ok(())
    }
}

fn create_dir_all(path: &Path) -> Result<(), FsError> {
    fs::create_dir_all(path).map_err(FsError::Io)
}

/// Create `path` (and parents) and, on Unix, restrict it to owner-only access.
/// A no-op permission-wise on platforms without POSIX mode bits.
fn create_dir_private(path: &Path) -> Result<(), FsError> {
    create_dir_all(path)?;
    set_private_permissions(path)
}

#[cfg(unix)]
fn set_private_permissions(path: &Path) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(FsError::Io)
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) -> Result<(), FsError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_correctly() {
        let root = PathBuf::from("/tmp/torman-test-root");
        let paths = Paths::new(Some(root.clone()));
        assert_eq!(paths.binaries_dir(), root.join("binaries"));
        assert_eq!(paths.data_dir(), root.join("data"));
        assert_eq!(paths.cache_dir(), root.join("cache"));
        assert_eq!(paths.hidden_services_dir(), root.join("hidden_services"));
        assert_eq!(
            paths.hidden_service_dir(3),
            root.join("hidden_services").join("hs_3")
        );
        assert_eq!(paths.torrc_path(), root.join("torrc"));
        assert_eq!(paths.lock_path(), root.join("torman.lock"));
    }

    #[test]
    fn ensure_creates_directories_with_expected_permissions() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().join("root")));
        paths.ensure().expect("ensure");

        assert!(paths.binaries_dir().is_dir());
        assert!(paths.data_dir().is_dir());
        assert!(paths.cache_dir().is_dir());
        assert!(paths.hidden_services_dir().is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(paths.data_dir()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
