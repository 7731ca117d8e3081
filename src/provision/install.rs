//! Downloads, verifies, and unpacks a Tor Expert Bundle release.
//!
//! Discovery (`find_tor_binary`/`is_available`) generalizes
//! `privacy::ctor::CTorHiddenService::find_tor_binary`/`is_available` from "search
//! PATH" to "search PATH, then the managed `binaries/` directory, then
//! `TOR_BINARY_OVERRIDE`".

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::archive;
use super::discover::{discover_latest_download, DiscoveredRelease};
use crate::config::TOR_BINARY_OVERRIDE_ENV;
use crate::error::ProvisionError;
use crate::paths::Paths;

/// Find a usable `tor` executable: an explicit `TOR_BINARY_OVERRIDE`, then the
/// managed `binaries/` directory, then `PATH`.
pub fn find_tor_binary(paths: &Paths) -> Option<PathBuf> {
    if let Ok(override_path) = std::env::var(TOR_BINARY_OVERRIDE_ENV) {
        let path = PathBuf::from(override_path);
        if path.is_file() {
            return Some(path);
        }
        warn!(
            path = %path.display(),
            "TOR_BINARY_OVERRIDE is set but does not point at a file"
        );
    }

    let managed = paths.tor_binary_path();
    if managed.is_file() {
        return Some(managed);
    }

    which::which("tor").ok()
}

pub fn binaries_present(paths: &Paths) -> bool {
    find_tor_binary(paths).is_some()
}

/// Downloads the latest Expert Bundle, verifies its SHA-256 digest, and unpacks it
/// into `paths.binaries_dir()`. The archive is extracted into a temporary staging
/// directory under the cache dir first; every file the bundle ships alongside the
/// `tor` executable (shared libraries, pluggable transports, the `data/` geoip
/// databases) is then copied, not just the single binary, so the installed binary
/// never launches missing a runtime dependency. That copy itself lands in a second
/// staging directory (also under the cache dir, so it shares a filesystem with
/// `binaries_dir()`), which is only renamed into place once fully populated — a
/// crash mid-copy leaves the half-built staging directory behind instead of a
/// half-populated `binaries_dir()`.
pub async fn install_latest(
    paths: &Paths,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<String, ProvisionError> {
    let release = tokio::time::timeout(timeout, discover_latest_download(client))
        .await
        .map_err(|_| ProvisionError::ArchiveCorrupt("download index request timed out".to_string()))??;

    let archive_path = paths.cache_dir().join(&release.filename);
    download_to(client, &release.url, &archive_path).await?;
    verify_checksum(client, &release, &archive_path).await?;

    let staging = tempfile::tempdir_in(paths.cache_dir())?;
    archive::extract(&archive_path, staging.path())?;

    let extracted_binary = find_extracted_tor_binary(staging.path())
        .ok_or_else(|| ProvisionError::ArchiveCorrupt("archive did not contain a tor executable".to_string()))?;
    let bin_dir = extracted_binary.parent().ok_or_else(|| {
        ProvisionError::ArchiveCorrupt("tor executable has no containing directory".to_string())
    })?;
    let binary_filename = extracted_binary
        .file_name()
        .ok_or_else(|| ProvisionError::ArchiveCorrupt("tor executable has no file name".to_string()))?;

    // Build the new binaries_dir() contents in a sibling staging directory first;
    // nothing is visible at the canonical path until the rename below succeeds.
    let new_binaries = tempfile::tempdir_in(paths.cache_dir())?;

    // Copy everything that shipped alongside the executable (shared libraries,
    // pluggable transport binaries) flat into the staged directory so the
    // canonical tor_binary_path() lands on the real file rather than a wrapping
    // directory.
    copy_tree(bin_dir, new_binaries.path())?;

    // The geoip databases ship in a sibling `data/` directory at the bundle root,
    // not next to the executable; preserve it too if present.
    if let Some(data_dir) = find_sibling_dir(staging.path(), "data") {
        copy_tree(&data_dir, &new_binaries.path().join("data"))?;
    }

    make_executable(&new_binaries.path().join(binary_filename))?;

    swap_into_place(new_binaries, &paths.binaries_dir())?;

    info!(version = %release.version, "installed Tor binary");
    Ok(release.version)
}

/// Atomically swap a fully-populated staging directory into place at `target`,
/// replacing whatever (if anything) is there. `staging` must live on the same
/// filesystem as `target`'s parent so the rename is a single directory-entry
/// update rather than a cross-filesystem copy — a crash before this call leaves
/// only the staging directory behind, never a half-populated `target`.
fn swap_into_place(staging: tempfile::TempDir, target: &std::path::Path) -> Result<(), ProvisionError> {
    if target.is_dir() {
        std::fs::remove_dir_all(target)?;
    }
    let staging_path = staging.into_path();
    std::fs::rename(&staging_path, target)?;
    Ok(())
}

/// Recursively copy every entry under `src` into `dst`, creating directories as
/// needed.
fn copy_tree(src: &std::path::Path, dst: &std::path::Path) -> Result<(), ProvisionError> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Find a directory named `name` anywhere under `root`.
fn find_sibling_dir(root: &std::path::Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(name) {
                return Some(path);
            }
            if let Some(found) = find_sibling_dir(&path, name) {
                return Some(found);
            }
        }
    }
    None
}

async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &std::path::Path,
) -> Result<(), ProvisionError> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(dest).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Verify the archive's SHA-256 digest against the Tor Project's published
/// checksum file, which sits alongside the archive under the same directory. Fails
/// closed: an unreachable checksum file is treated the same as a mismatch, not
/// skipped.
async fn verify_checksum(
    client: &reqwest::Client,
    release: &DiscoveredRelease,
    archive_path: &std::path::Path,
) -> Result<(), ProvisionError> {
    let checksums_url = checksums_url_for(&release.url);

    let checksums_text = client
        .get(&checksums_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|_| ProvisionError::IntegrityMismatch)?
        .text()
        .await
        .map_err(|_| ProvisionError::IntegrityMismatch)?;

    let expected_digest = checksums_text
        .lines()
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let digest = fields.next()?;
            let name = fields.next()?.trim_start_matches('*');
            (name == release.filename).then(|| digest.to_string())
        })
        .ok_or(ProvisionError::IntegrityMismatch)?;

    let contents = std::fs::read(archive_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual_digest = hex::encode(hasher.finalize());

    if actual_digest.eq_ignore_ascii_case(&expected_digest) {
        Ok(())
    } else {
        let _ = std::fs::remove_file(archive_path);
        Err(ProvisionError::IntegrityMismatch)
    }
}

fn checksums_url_for(archive_url: &str) -> String {
    let dir = archive_url.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(archive_url);
    format!("{dir}/sha256sums-signed-build.txt")
}

fn find_extracted_tor_binary(root: &std::path::Path) -> Option<PathBuf> {
    let target_name = if cfg!(windows) { "tor.exe" } else { "tor" };
    walk_for_file(root, target_name)
}

fn walk_for_file(dir: &std::path::Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = walk_for_file(&path, name) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(name) {
            return Some(path);
        }
    }
    None
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> Result<(), ProvisionError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksums_url_sits_alongside_archive() {
        let url = "https://dist.torproject.org/torbrowser/13.5.1/tor-expert-bundle-linux-x86_64-13.5.1.tar.gz";
        assert_eq!(
            checksums_url_for(url),
            "https://dist.torproject.org/torbrowser/13.5.1/sha256sums-signed-build.txt"
        );
    }

    #[test]
    fn find_tor_binary_prefers_managed_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        std::fs::write(paths.tor_binary_path(), b"#!/bin/sh\n").unwrap();

        let found = find_tor_binary(&paths).expect("found");
        assert_eq!(found, paths.tor_binary_path());
    }

    #[test]
    fn walk_for_file_finds_nested_binary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("tor-expert-bundle").join("tor").join("bin");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("tor"), b"binary").unwrap();

        let found = walk_for_file(tmp.path(), "tor").expect("found");
        assert_eq!(found, nested.join("tor"));
    }

    #[test]
    fn copy_tree_preserves_shared_libraries_alongside_binary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bundle = tmp.path().join("bundle");
        let bin_dir = bundle.join("tor");
        std::fs::create_dir_all(bin_dir.join("pt")).unwrap();
        std::fs::write(bin_dir.join("tor"), b"binary").unwrap();
        std::fs::write(bin_dir.join("libevent-2.1.so.7"), b"lib").unwrap();
        std::fs::write(bin_dir.join("pt").join("obfs4proxy"), b"pt").unwrap();

        let dest = tmp.path().join("binaries");
        copy_tree(&bin_dir, &dest).expect("copy_tree");

        assert!(dest.join("tor").is_file());
        assert!(dest.join("libevent-2.1.so.7").is_file());
        assert!(dest.join("pt").join("obfs4proxy").is_file());
    }

    #[test]
    fn find_sibling_dir_locates_data_directory_at_bundle_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let data_dir = tmp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("geoip"), b"geoip").unwrap();

        let found = find_sibling_dir(tmp.path(), "data").expect("found");
        assert_eq!(found, data_dir);
    }

    #[test]
    fn swap_into_place_replaces_an_existing_target() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("binaries");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale"), b"old install").unwrap();

        let staging = tempfile::tempdir_in(tmp.path()).expect("staging");
        std::fs::write(staging.path().join("tor"), b"new install").unwrap();

        swap_into_place(staging, &target).expect("swap");

        assert!(target.join("tor").is_file());
        assert!(!target.join("stale").exists());
    }

    #[test]
    fn swap_into_place_populates_a_target_that_does_not_exist_yet() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("binaries");

        let staging = tempfile::tempdir_in(tmp.path()).expect("staging");
        std::fs::write(staging.path().join("tor"), b"new install").unwrap();

        swap_into_place(staging, &target).expect("swap");

        assert!(target.join("tor").is_file());
    }
}
