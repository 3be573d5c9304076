//! Analysis command and result model.
//!
//! [`CommandRequest`] is what the host asks for; [`CommandResult`] is what
//! the server replies with. The server has two reply shapes (newer builds
//! return per-format payloads under `data`, older builds a single `diagram`
//! string); both deserialize into one tagged union so downstream code gets
//! an exhaustive match instead of optional-field probing.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// The analyses the server knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    CallGraph,
    SequenceDiagram,
    StorageAnalysis,
}

impl AnalysisKind {
    /// All kinds, in the order `generate-all` runs them.
    pub const ALL: [Self; 3] = [Self::CallGraph, Self::SequenceDiagram, Self::StorageAnalysis];

    /// Command string carried in `workspace/executeCommand`.
    #[must_use]
    pub fn wire_command(self) -> &'static str {
        match self {
            Self::CallGraph => "generateCallGraph",
            Self::SequenceDiagram => "generateSequenceDiagram",
            Self::StorageAnalysis => "generateStorageAnalysis",
        }
    }

    #[must_use]
    pub fn category(self) -> ArtifactCategory {
        match self {
            Self::CallGraph => ArtifactCategory::CallGraph,
            Self::SequenceDiagram => ArtifactCategory::SequenceDiagram,
            Self::StorageAnalysis => ArtifactCategory::StorageReport,
        }
    }

    /// Stem for artifact file names (`call-graph-<date>.dot`).
    #[must_use]
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::CallGraph => "call-graph",
            Self::SequenceDiagram => "sequence-diagram",
            Self::StorageAnalysis => "storage-report",
        }
    }

    /// Human-readable name for notifications.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::CallGraph => "call graph",
            Self::SequenceDiagram => "sequence diagram",
            Self::StorageAnalysis => "storage analysis",
        }
    }
}

/// One analysis invocation. Built fresh per command, never mutated after send.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    kind: AnalysisKind,
    workspace_root: PathBuf,
    chunking: bool,
}

impl CommandRequest {
    #[must_use]
    pub fn new(kind: AnalysisKind, workspace_root: PathBuf, chunking: bool) -> Self {
        Self {
            kind,
            workspace_root,
            chunking,
        }
    }

    #[must_use]
    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    #[must_use]
    pub fn chunking(&self) -> bool {
        self.chunking
    }
}

/// Per-format payloads of a multi-format result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagramData {
    #[serde(default)]
    dot: Option<String>,
    #[serde(default)]
    mermaid: Option<String>,
}

impl DiagramData {
    #[must_use]
    pub fn dot(&self) -> Option<&str> {
        self.dot.as_deref()
    }

    #[must_use]
    pub fn mermaid(&self) -> Option<&str> {
        self.mermaid.as_deref()
    }
}

/// Legacy single-format reply: one opaque `diagram` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyResult {
    success: bool,
    #[serde(default)]
    diagram: Option<String>,
}

impl LegacyResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn diagram(&self) -> Option<&str> {
        self.diagram.as_deref()
    }
}

/// Multi-format reply: per-format payloads under `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiFormatResult {
    success: bool,
    #[serde(default)]
    data: Option<DiagramData>,
}

impl MultiFormatResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn data(&self) -> Option<&DiagramData> {
        self.data.as_ref()
    }
}

/// Result payload of an analysis command.
///
/// The legacy shape is tried first and rejects unknown fields, so a reply
/// carrying `data` can never be swallowed as a legacy result with the
/// payload dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandResult {
    Legacy(LegacyResult),
    MultiFormat(MultiFormatResult),
}

impl CommandResult {
    #[must_use]
    pub fn success(&self) -> bool {
        match self {
            Self::Legacy(r) => r.success(),
            Self::MultiFormat(r) => r.success(),
        }
    }
}

/// Category an artifact is filed under in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactCategory {
    CallGraph,
    SequenceDiagram,
    StorageReport,
    Other,
}

impl ArtifactCategory {
    /// Subdirectory name under the output root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::CallGraph => "call-graphs",
            Self::SequenceDiagram => "sequence-diagrams",
            Self::StorageReport => "storage-reports",
            Self::Other => "reports",
        }
    }
}

/// A file written by the persister. Derived, written once, never updated.
#[derive(Debug, Clone)]
pub struct PersistedArtifact {
    path: PathBuf,
    category: ArtifactCategory,
}

impl PersistedArtifact {
    #[must_use]
    pub fn new(path: PathBuf, category: ArtifactCategory) -> Self {
        Self { path, category }
    }

    /// Absolute path of the written file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn category(&self) -> ArtifactCategory {
        self.category
    }
}
