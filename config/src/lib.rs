//! Settings loading and persistence for the Traverse runtime.
//!
//! The host owns these values; the core only reads them. Settings live as
//! TOML under the user config directory, with `TRAVERSE_CONFIG` overriding
//! the location for tests and unusual setups. A missing file yields
//! defaults; a malformed file is a typed error, never a silent reset.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings at {path} are not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read-only inputs to the runtime core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ask the server to split large outputs.
    pub chunking: bool,
    /// Explicit server executable override; empty means "locate one".
    pub server_path: String,
    /// Trace level handed to the server process environment.
    pub trace_level: String,
    /// Cap on reported problems, passed through to the server.
    pub max_problems: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunking: false,
            server_path: String::new(),
            trace_level: "off".to_string(),
            max_problems: 100,
        }
    }
}

impl Settings {
    /// The configured server path, or `None` when blank.
    #[must_use]
    pub fn server_path_override(&self) -> Option<&str> {
        let trimmed = self.server_path.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }
}

/// Default settings location: `<config dir>/traverse/config.toml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TRAVERSE_CONFIG")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("traverse")
        .join("config.toml")
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }
        Err(e) => return Err(io_error(path, e)),
    };
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist settings to `path` via temp file + rename.
pub fn save(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;

    let body = toml::to_string_pretty(settings)?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_error(path, e))?;
    tmp.write_all(body.as_bytes())
        .map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

/// Flip the chunking flag and persist it, returning the new settings.
pub fn toggle_chunking(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings = load(path)?;
    settings.chunking = !settings.chunking;
    save(&settings, path)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load(&dir.path().join("config.toml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert!(!settings.chunking);
        assert_eq!(settings.trace_level, "off");
        assert_eq!(settings.max_problems, 100);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traverse").join("config.toml");

        let settings = Settings {
            chunking: true,
            server_path: "/opt/traverse-server".to_string(),
            trace_level: "verbose".to_string(),
            max_problems: 25,
        };
        save(&settings, &path).expect("save");

        assert_eq!(load(&path).expect("load"), settings);
    }

    #[test]
    fn test_toggle_chunking_flips_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let settings = toggle_chunking(&path).expect("first toggle");
        assert!(settings.chunking);
        assert!(load(&path).expect("reload").chunking);

        let settings = toggle_chunking(&path).expect("second toggle");
        assert!(!settings.chunking);
        assert!(!load(&path).expect("reload").chunking);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "chunking = \"definitely\"").expect("write");

        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "chunking = true").expect("write");

        let settings = load(&path).expect("load");
        assert!(settings.chunking);
        assert_eq!(settings.max_problems, 100);
        assert!(settings.server_path_override().is_none());
    }

    #[test]
    fn test_blank_server_path_is_no_override() {
        let settings = Settings {
            server_path: "   ".to_string(),
            ..Settings::default()
        };
        assert!(settings.server_path_override().is_none());

        let settings = Settings {
            server_path: "/usr/local/bin/traverse-server".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            settings.server_path_override(),
            Some("/usr/local/bin/traverse-server")
        );
    }
}
