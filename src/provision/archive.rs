//! Archive extraction for the two formats the Expert Bundle ships as.
//!
//! `.tar.gz` handling (gzip decoder piped into the tar reader, bounded by a maximum
//! decompressed size) mirrors the decompression-bomb guard used elsewhere in the
//! corpus for gzip bodies; `.zip` uses the same crate already in the dependency
//! tree for archive handling.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::ProvisionError;

/// Refuse to extract an archive that would decompress past this size. The Expert
/// Bundle is a few tens of megabytes; anything past this is treated as corrupt or
/// hostile input rather than a legitimate release.
const MAX_DECOMPRESSED_BYTES: u64 = 512 * 1024 * 1024;

pub fn extract(archive_path: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let filename = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest)
    } else if filename.ends_with(".zip") {
        extract_zip(archive_path, dest)
    } else {
        Err(ProvisionError::ArchiveCorrupt(format!(
            "unrecognized archive extension: {filename}"
        )))
    }
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let file = File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let bounded = decoder.take(MAX_DECOMPRESSED_BYTES);
    let mut archive = tar::Archive::new(bounded);
    archive
        .unpack(dest)
        .map_err(|e| ProvisionError::ArchiveCorrupt(e.to_string()))
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ProvisionError::ArchiveCorrupt(e.to_string()))?;

    let mut total_written: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ProvisionError::ArchiveCorrupt(e.to_string()))?;
        let Some(out_path) = entry.enclosed_name().map(|p| dest.join(p)) else {
            continue;
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        total_written += entry.size();
        if total_written > MAX_DECOMPRESSED_BYTES {
            return Err(ProvisionError::ArchiveCorrupt(
                "zip archive exceeds maximum decompressed size".to_string(),
            ));
        }

        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_extension_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bogus = tmp.path().join("archive.rar");
        std::fs::write(&bogus, b"not an archive").unwrap();
        let result = extract(&bogus, tmp.path());
        assert!(matches!(result, Err(ProvisionError::ArchiveCorrupt(_))));
    }
}
