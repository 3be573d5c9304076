//! Release feed client: resolve, download, and install server binaries.
//!
//! Installs are transactional. The asset streams into a temp file inside
//! the storage directory and only a fully transferred, non-empty body is
//! renamed to the canonical versioned path. A failed download removes the
//! temp file and never disturbs a previously installed binary.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use traverse_types::PlatformTag;

use crate::storage;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no server build is published for this platform ({tag})")]
    UnsupportedPlatform { tag: String },
    #[error("download failed: {detail}")]
    DownloadFailed { status: Option<u16>, detail: String },
    #[error("a server download is already in progress")]
    DownloadInProgress,
    #[error("failed to install server binary: {0}")]
    InstallFailed(#[from] std::io::Error),
}

impl ProvisionError {
    fn download_failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::DownloadFailed {
            status,
            detail: detail.into(),
        }
    }
}

/// One release in the feed reply.
#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// One downloadable asset; selected by platform-tag substring in its name.
#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// An installed, executable server binary.
#[derive(Debug, Clone)]
pub struct InstalledBinary {
    version: String,
    path: PathBuf,
}

impl InstalledBinary {
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Client for the versioned server release feed.
pub struct ReleaseFeed {
    http: reqwest::Client,
    base_url: String,
    storage_dir: PathBuf,
    /// Held for the whole install; `try_lock` failure means a download is
    /// already in flight and the caller fails fast.
    download_gate: Mutex<()>,
}

impl ReleaseFeed {
    #[must_use]
    pub fn new(base_url: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            storage_dir: storage_dir.into(),
            download_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Resolve the latest release and install its binary for this host.
    pub async fn download_latest(&self) -> Result<InstalledBinary, ProvisionError> {
        let Ok(_guard) = self.download_gate.try_lock() else {
            return Err(ProvisionError::DownloadInProgress);
        };

        let tag = PlatformTag::current()
            .filter(|t| t.is_supported())
            .ok_or_else(|| ProvisionError::UnsupportedPlatform {
                tag: host_tag_label(),
            })?;
        let tag_text = tag.to_string();

        let release = self.fetch_latest().await?;
        let asset = release
            .assets
            .iter()
            .find(|a| a.name.contains(&tag_text))
            .ok_or(ProvisionError::UnsupportedPlatform { tag: tag_text })?;
        let version = release.tag_name.trim_start_matches('v').to_string();

        std::fs::create_dir_all(&self.storage_dir)?;
        let tmp = self.stream_to_temp(&asset.browser_download_url).await?;

        let final_path = self.storage_dir.join(storage::binary_file_name(&version, tag));
        tmp.persist(&final_path)
            .map_err(|e| ProvisionError::InstallFailed(e.error))?;
        storage::mark_executable(&final_path)?;
        self.evict_stale(tag, &final_path);

        tracing::info!(
            version = %version,
            path = %final_path.display(),
            "Installed analysis server"
        );
        Ok(InstalledBinary {
            version,
            path: final_path,
        })
    }

    async fn fetch_latest(&self) -> Result<Release, ProvisionError> {
        let url = format!("{}/releases/latest", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ProvisionError::download_failed(None, format!("release feed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::download_failed(
                Some(status.as_u16()),
                format!("release feed returned HTTP {status}"),
            ));
        }

        response.json::<Release>().await.map_err(|e| {
            ProvisionError::download_failed(None, format!("malformed release feed reply: {e}"))
        })
    }

    /// Stream an asset into a temp file next to its final location.
    ///
    /// Dropping the temp file on any error path removes the partial write.
    async fn stream_to_temp(&self, url: &str) -> Result<NamedTempFile, ProvisionError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::download_failed(None, format!("asset download: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::download_failed(
                Some(status.as_u16()),
                format!("asset download returned HTTP {status}"),
            ));
        }

        let mut tmp = NamedTempFile::new_in(&self.storage_dir)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ProvisionError::download_failed(None, format!("transfer interrupted: {e}"))
            })?;
            tmp.write_all(&chunk)?;
            written += chunk.len() as u64;
        }

        if written == 0 {
            return Err(ProvisionError::download_failed(
                None,
                "release asset body was empty",
            ));
        }
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Delete older installed versions for `tag`, keeping only `keep`.
    ///
    /// Best-effort: eviction failure is logged, never fatal.
    fn evict_stale(&self, tag: PlatformTag, keep: &Path) {
        let Ok(entries) = std::fs::read_dir(&self.storage_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path == keep {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !storage::is_binary_for(name, tag) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Evicted stale server binary"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to evict stale binary: {e}");
                }
            }
        }
    }
}

/// Host tag for error messages, even when outside the release vocabulary.
fn host_tag_label() -> String {
    PlatformTag::current().map_or_else(
        || format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        |t| t.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn current_tag_text() -> String {
        PlatformTag::current()
            .expect("test hosts are in the release vocabulary")
            .to_string()
    }

    fn release_json(server_uri: &str, version: &str, asset_tag: &str) -> serde_json::Value {
        serde_json::json!({
            "tag_name": format!("v{version}"),
            "assets": [{
                "name": format!("traverse-server-{version}-{asset_tag}"),
                "browser_download_url": format!("{server_uri}/assets/{version}")
            }]
        })
    }

    async fn mount_latest(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_download_latest_installs_versioned_binary() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");
        let tag = current_tag_text();

        mount_latest(&server, release_json(&server.uri(), "1.2.3", &tag)).await;
        Mock::given(method("GET"))
            .and(path("/assets/1.2.3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"server-bytes".to_vec()))
            .mount(&server)
            .await;

        let feed = ReleaseFeed::new(server.uri(), storage.path());
        let installed = feed.download_latest().await.expect("install");

        assert_eq!(installed.version(), "1.2.3");
        assert!(installed.path().starts_with(storage.path()));
        let name = installed.path().file_name().unwrap().to_str().unwrap();
        assert!(name.contains("1.2.3") && name.contains(&tag));
        assert_eq!(
            std::fs::read(installed.path()).expect("read installed"),
            b"server-bytes"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(installed.path())
                .expect("meta")
                .permissions()
                .mode();
            assert_eq!(mode & 0o100, 0o100, "owner-execute bit must be set");
        }
    }

    #[tokio::test]
    async fn test_no_matching_asset_is_unsupported_platform() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");

        mount_latest(&server, release_json(&server.uri(), "1.2.3", "solaris-sparc")).await;

        let feed = ReleaseFeed::new(server.uri(), storage.path());
        let err = feed.download_latest().await.expect_err("must fail");
        assert!(matches!(err, ProvisionError::UnsupportedPlatform { .. }));
    }

    #[tokio::test]
    async fn test_feed_error_status_is_download_failed() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");

        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = ReleaseFeed::new(server.uri(), storage.path());
        let err = feed.download_latest().await.expect_err("must fail");
        match err {
            ProvisionError::DownloadFailed { status, .. } => assert_eq!(status, Some(503)),
            other => panic!("expected DownloadFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_body_leaves_no_install_and_keeps_prior_version() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");
        let tag = PlatformTag::current().expect("supported host");

        // A valid earlier install that must survive the failed download.
        let prior = storage
            .path()
            .join(storage::binary_file_name("1.0.0", tag));
        std::fs::write(&prior, b"old-but-good").expect("write prior");

        mount_latest(&server, release_json(&server.uri(), "2.0.0", &tag.to_string())).await;
        Mock::given(method("GET"))
            .and(path("/assets/2.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .mount(&server)
            .await;

        let feed = ReleaseFeed::new(server.uri(), storage.path());
        let err = feed.download_latest().await.expect_err("must fail");
        assert!(matches!(err, ProvisionError::DownloadFailed { .. }));

        let canonical = storage
            .path()
            .join(storage::binary_file_name("2.0.0", tag));
        assert!(!canonical.exists(), "no partial install may remain");
        assert_eq!(std::fs::read(&prior).expect("read prior"), b"old-but-good");

        // Only the prior binary and no temp leftovers remain.
        let remaining: Vec<_> = std::fs::read_dir(storage.path())
            .expect("read_dir")
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_successful_install_evicts_stale_versions() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");
        let tag = PlatformTag::current().expect("supported host");

        let stale = storage
            .path()
            .join(storage::binary_file_name("0.9.0", tag));
        std::fs::write(&stale, b"stale").expect("write stale");

        mount_latest(&server, release_json(&server.uri(), "1.0.0", &tag.to_string())).await;
        Mock::given(method("GET"))
            .and(path("/assets/1.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let feed = ReleaseFeed::new(server.uri(), storage.path());
        let installed = feed.download_latest().await.expect("install");

        assert!(!stale.exists(), "older version must be evicted");
        assert!(installed.path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_download_fails_fast() {
        let server = MockServer::start().await;
        let storage = tempfile::tempdir().expect("tempdir");
        let tag = current_tag_text();

        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(release_json(&server.uri(), "1.0.0", &tag))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/assets/1.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let feed = Arc::new(ReleaseFeed::new(server.uri(), storage.path()));
        let first = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.download_latest().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = feed.download_latest().await;
        assert!(matches!(second, Err(ProvisionError::DownloadInProgress)));

        let first = first.await.expect("join").expect("first download succeeds");
        assert!(first.path().exists());
    }
}
