//! Candidate-source resolution for the server executable.
//!
//! First match wins: an explicit configured override, then the most
//! recently installed binary for the current platform. The result is never
//! persisted; every lookup recomputes it against the filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use traverse_types::PlatformTag;

use crate::storage;

/// Which candidate source produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    Configured,
    Installed,
}

/// A usable server executable on disk.
#[derive(Debug, Clone)]
pub struct BinaryLocation {
    path: PathBuf,
    source: BinarySource,
}

impl BinaryLocation {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> BinarySource {
        self.source
    }
}

/// Resolve the first usable server binary, or `None`.
///
/// A configured override is validated for existence only - its permission
/// bits are the caller's responsibility, and a missing override falls
/// through to the installed cache rather than failing. Installed binaries
/// are re-marked owner-executable on every hit.
#[must_use]
pub fn locate(storage_dir: &Path, configured_override: Option<&str>) -> Option<BinaryLocation> {
    if let Some(raw) = configured_override {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            if path.is_file() {
                return Some(BinaryLocation {
                    path,
                    source: BinarySource::Configured,
                });
            }
            tracing::warn!(
                path = %path.display(),
                "Configured server path does not exist, trying installed binaries"
            );
        }
    }

    let tag = PlatformTag::current()?;
    let path = newest_installed(storage_dir, tag)?;
    if let Err(e) = storage::mark_executable(&path) {
        tracing::warn!(path = %path.display(), "Failed to mark installed binary executable: {e}");
    }
    Some(BinaryLocation {
        path,
        source: BinarySource::Installed,
    })
}

/// Most recently installed binary matching `tag`, by modification time.
fn newest_installed(storage_dir: &Path, tag: PlatformTag) -> Option<PathBuf> {
    let entries = fs::read_dir(storage_dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !storage::is_binary_for(name, tag) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }

    newest.map(|(_, path)| path)
}
