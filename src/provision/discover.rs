//! Discovers the latest Tor Expert Bundle release for the current platform.

use crate::error::ProvisionError;

const DOWNLOAD_INDEX_URL: &str = "https://www.torproject.org/download/tor/";

/// A discovered Expert Bundle release, ready to hand to the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRelease {
    pub version: String,
    pub url: String,
    pub filename: String,
}

/// Maps `(std::env::consts::OS, std::env::consts::ARCH)` to the filename fragment
/// the Tor Project uses for its Expert Bundle archives.
fn arch_tag(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Some("linux-x86_64"),
        ("linux", "x86") => Some("linux-i686"),
        ("macos", "x86_64") => Some("macos-x86_64"),
        ("macos", "aarch64") => Some("macos-aarch64"),
        ("windows", "x86_64") => Some("windows-x86_64"),
        ("windows", "x86") => Some("windows-i686"),
        _ => None,
    }
}

/// Query the Tor Project download index and return the latest Expert Bundle
/// release for this process's OS/architecture.
pub async fn discover_latest_download(
    client: &reqwest::Client,
) -> Result<DiscoveredRelease, ProvisionError> {
    let tag = arch_tag(std::env::consts::OS, std::env::consts::ARCH)
        .ok_or(ProvisionError::ArchitectureUnsupported)?;

    let body = client
        .get(DOWNLOAD_INDEX_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    find_release_for_tag(&body, tag).ok_or(ProvisionError::ArchitectureUnsupported)
}

/// Pure parsing of the download index body, split out for testing without network
/// access. Scans `href="..."` attributes for a filename containing `tag` and an
/// Expert Bundle archive extension, and derives the version from the path segment
/// that precedes the filename (`.../dist/torbrowser/13.x.x/tor-expert-bundle-...`).
fn find_release_for_tag(body: &str, tag: &str) -> Option<DiscoveredRelease> {
    for hit in body.match_indices("href=\"") {
        let start = hit.0 + "href=\"".len();
        let rest = &body[start..];
        let end = rest.find('"')?;
        let url = &rest[..end];

        if !url.contains(tag) {
            continue;
        }
        if !(url.ends_with(".tar.gz") || url.ends_with(".zip")) {
            continue;
        }

        let filename = url.rsplit('/').next().unwrap_or(url).to_string();
        let version = url
            .split('/')
            .rev()
            .find(|segment| segment.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .unwrap_or("unknown")
            .to_string();

        return Some(DiscoveredRelease {
            version,
            url: url.to_string(),
            filename,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INDEX: &str = r#"
        <a href="https://dist.torproject.org/torbrowser/13.5.1/tor-expert-bundle-linux-x86_64-13.5.1.tar.gz">linux x86_64</a>
        <a href="https://dist.torproject.org/torbrowser/13.5.1/tor-expert-bundle-windows-x86_64-13.5.1.zip">windows x86_64</a>
        <a href="https://dist.torproject.org/torbrowser/13.5.1/tor-expert-bundle-macos-aarch64-13.5.1.tar.gz">macos aarch64</a>
    "#;

    #[test]
    fn finds_matching_release_for_linux_tag() {
        let release = find_release_for_tag(SAMPLE_INDEX, "linux-x86_64").expect("release");
        assert_eq!(release.version, "13.5.1");
        assert_eq!(
            release.filename,
            "tor-expert-bundle-linux-x86_64-13.5.1.tar.gz"
        );
    }

    #[test]
    fn finds_matching_release_for_windows_tag() {
        let release = find_release_for_tag(SAMPLE_INDEX, "windows-x86_64").expect("release");
        assert!(release.filename.ends_with(".zip"));
    }

    #[test]
    fn returns_none_for_unmatched_tag() {
        assert!(find_release_for_tag(SAMPLE_INDEX, "linux-i686").is_none());
    }

    #[test]
    fn unsupported_arch_tag_is_none() {
        assert!(arch_tag("freebsd", "x86_64").is_none());
    }

    #[test]
    fn supported_arch_tags_are_mapped() {
        assert_eq!(arch_tag("linux", "x86_64"), Some("linux-x86_64"));
        assert_eq!(arch_tag("macos", "aarch64"), Some("macos-aarch64"));
    }
}
