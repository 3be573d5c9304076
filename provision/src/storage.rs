//! On-disk layout of installed server binaries.
//!
//! Binaries are keyed by version and platform tag so multiple versions can
//! coexist without collision: `traverse-server-<version>-<os>-<arch>[.exe]`.
//! Installed files are never mutated in place; installs write elsewhere and
//! rename over.

use std::io;
use std::path::{Path, PathBuf};

use traverse_types::{Os, PlatformTag};

const BINARY_PREFIX: &str = "traverse-server-";

/// Default private storage directory: `<data dir>/traverse/bin`.
#[must_use]
pub fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("traverse").join("bin"))
        .unwrap_or_else(|| PathBuf::from(".traverse").join("bin"))
}

/// File name for an installed binary of `version` on `tag`.
#[must_use]
pub fn binary_file_name(version: &str, tag: PlatformTag) -> String {
    let ext = match tag.os() {
        Os::Windows => ".exe",
        Os::MacOs | Os::Linux => "",
    };
    format!("{BINARY_PREFIX}{version}-{tag}{ext}")
}

/// Whether `name` is an installed binary for `tag`.
#[must_use]
pub fn is_binary_for(name: &str, tag: PlatformTag) -> bool {
    name.starts_with(BINARY_PREFIX) && name.contains(&tag.to_string())
}

/// Mark `path` executable for its owner. Idempotent; no-op on non-Unix.
pub fn mark_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o700);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
