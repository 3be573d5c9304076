//! Core domain types for Traverse - no IO, no async.

pub mod command;
pub mod platform;

pub use command::{
    AnalysisKind, ArtifactCategory, CommandRequest, CommandResult, DiagramData, LegacyResult,
    MultiFormatResult, PersistedArtifact,
};
pub use platform::{Arch, Os, PlatformTag};
