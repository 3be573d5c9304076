//! Canonical platform identity used to select server builds.
//!
//! The analysis server ships one prebuilt binary per OS/architecture pair.
//! The tag is derived once per process and used both to pick a release asset
//! and to gate activation on hosts the feed does not publish for.

use std::fmt;

/// Operating systems in the release vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    MacOs,
    Linux,
    Windows,
}

impl Os {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }
}

/// CPU architectures in the release vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Canonical OS + architecture pair, rendered as `<os>-<arch>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTag {
    os: Os,
    arch: Arch,
}

/// Platforms the analysis server is published for.
const SUPPORTED: &[PlatformTag] = &[
    PlatformTag::new(Os::MacOs, Arch::X64),
    PlatformTag::new(Os::MacOs, Arch::Arm64),
    PlatformTag::new(Os::Linux, Arch::X64),
    PlatformTag::new(Os::Linux, Arch::Arm64),
    PlatformTag::new(Os::Windows, Arch::X64),
];

impl PlatformTag {
    #[must_use]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Identify the running host.
    ///
    /// Returns `None` when the host OS or architecture is outside the
    /// release vocabulary. Callers treat `None` exactly like a tag that
    /// fails [`is_supported`](Self::is_supported) - reported unsupported,
    /// never an error.
    #[must_use]
    pub fn current() -> Option<Self> {
        let os = match std::env::consts::OS {
            "macos" => Os::MacOs,
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            _ => return None,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            _ => return None,
        };
        Some(Self { os, arch })
    }

    /// Whether the release feed publishes binaries for this tag.
    #[must_use]
    pub fn is_supported(self) -> bool {
        SUPPORTED.contains(&self)
    }

    #[must_use]
    pub fn os(self) -> Os {
        self.os
    }

    #[must_use]
    pub fn arch(self) -> Arch {
        self.arch
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.label(), self.arch.label())
    }
}
