//! Writes analysis results into the categorized output tree.
//!
//! Layout: `<root>/traverse-output/<category>/<stem>-<YYYY-MM-DD>.<ext>`.
//! Same-day reruns overwrite - last write wins, no numeric suffixing.

use std::fs;
use std::path::{Path, PathBuf};

use traverse_types::{AnalysisKind, CommandResult, PersistedArtifact};

/// Root directory for all persisted analysis output.
pub const OUTPUT_DIR: &str = "traverse-output";

#[derive(Debug, thiserror::Error)]
#[error("failed to write {path}: {source}")]
pub struct PersistError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

impl PersistError {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError {
        path: path.to_path_buf(),
        source,
    }
}

/// Write every recognizable payload of `result` under `output_root`.
///
/// Returns the written paths in write order. An unsuccessful result, or
/// one with no payload, writes nothing and returns an empty list - the
/// caller decides how to surface "nothing to save".
pub fn persist(
    result: &CommandResult,
    kind: AnalysisKind,
    output_root: &Path,
) -> Result<Vec<PersistedArtifact>, PersistError> {
    if !result.success() {
        return Ok(Vec::new());
    }

    // (extension, payload text), in write order.
    let mut payloads: Vec<(&str, &str)> = Vec::new();
    match result {
        CommandResult::MultiFormat(r) => {
            if let Some(data) = r.data() {
                if let Some(dot) = data.dot() {
                    payloads.push(("dot", dot));
                }
                if let Some(mermaid) = data.mermaid() {
                    payloads.push(("mmd", mermaid));
                }
            }
        }
        CommandResult::Legacy(r) => {
            if let Some(text) = r.diagram() {
                payloads.push((sniff_extension(text), text));
            }
        }
    }
    if payloads.is_empty() {
        return Ok(Vec::new());
    }

    let category = kind.category();
    let dir = output_root.join(OUTPUT_DIR).join(category.dir_name());
    fs::create_dir_all(&dir).map_err(|e| write_error(&dir, e))?;

    let date = chrono::Local::now().format("%Y-%m-%d");
    let mut written = Vec::new();
    for (ext, text) in payloads {
        let path = dir.join(format!("{}-{date}.{ext}", kind.file_stem()));
        fs::write(&path, text).map_err(|e| write_error(&path, e))?;
        tracing::debug!(path = %path.display(), "Wrote analysis artifact");
        written.push(PersistedArtifact::new(path, category));
    }
    Ok(written)
}

/// Pick an extension for a legacy payload by its marker keywords.
///
/// Mermaid markers go first: a Mermaid `graph TD` would otherwise be
/// mistaken for DOT's undirected `graph`. Anything unrecognized lands in a
/// plain-text `.md`.
fn sniff_extension(text: &str) -> &'static str {
    const MERMAID_MARKERS: &[&str] = &[
        "sequenceDiagram",
        "flowchart",
        "erDiagram",
        "graph TD",
        "graph LR",
    ];
    if MERMAID_MARKERS.iter().any(|marker| text.contains(marker)) {
        return "mmd";
    }
    if text.contains("digraph") || text.trim_start().starts_with("strict graph") {
        return "dot";
    }
    "md"
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a result through the validated deserialization boundary.
    fn result_from(value: serde_json::Value) -> CommandResult {
        serde_json::from_value(value).expect("valid result shape")
    }

    fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn test_multi_format_writes_one_file_per_payload() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({
            "success": true,
            "data": { "dot": "digraph G { A -> B; }", "mermaid": "sequenceDiagram\n  A->>B: hi" }
        }));

        let artifacts = persist(&result, AnalysisKind::CallGraph, root.path()).expect("persist");
        assert_eq!(artifacts.len(), 2);

        let dot_path = root
            .path()
            .join("traverse-output/call-graphs")
            .join(format!("call-graph-{}.dot", today()));
        let mmd_path = root
            .path()
            .join("traverse-output/call-graphs")
            .join(format!("call-graph-{}.mmd", today()));

        // Write order: dot before mermaid.
        assert_eq!(artifacts[0].path(), dot_path);
        assert_eq!(artifacts[1].path(), mmd_path);
        assert_eq!(
            fs::read_to_string(&dot_path).expect("read dot"),
            "digraph G { A -> B; }"
        );
        assert!(
            fs::read_to_string(&mmd_path)
                .expect("read mmd")
                .starts_with("sequenceDiagram")
        );
    }

    #[test]
    fn test_failed_result_writes_nothing() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({ "success": false }));

        let artifacts = persist(&result, AnalysisKind::CallGraph, root.path()).expect("persist");
        assert!(artifacts.is_empty());
        assert!(
            !root.path().join(OUTPUT_DIR).exists(),
            "no output tree may be created for a failed result"
        );
    }

    #[test]
    fn test_success_without_payload_writes_nothing() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({ "success": true }));

        let artifacts =
            persist(&result, AnalysisKind::SequenceDiagram, root.path()).expect("persist");
        assert!(artifacts.is_empty());
        assert!(!root.path().join(OUTPUT_DIR).exists());
    }

    #[test]
    fn test_legacy_dot_payload_sniffs_dot_extension() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({
            "success": true,
            "diagram": "digraph G { A -> B; }"
        }));

        let artifacts = persist(&result, AnalysisKind::CallGraph, root.path()).expect("persist");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts[0].path().extension().and_then(|e| e.to_str()),
            Some("dot")
        );
    }

    #[test]
    fn test_legacy_mermaid_payload_sniffs_mmd_extension() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({
            "success": true,
            "diagram": "sequenceDiagram\n  Editor->>Server: request"
        }));

        let artifacts =
            persist(&result, AnalysisKind::SequenceDiagram, root.path()).expect("persist");
        assert_eq!(
            artifacts[0].path().extension().and_then(|e| e.to_str()),
            Some("mmd")
        );
    }

    #[test]
    fn test_legacy_unrecognized_payload_defaults_to_md() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = result_from(serde_json::json!({
            "success": true,
            "diagram": "# Storage access report\n\nNothing remarkable."
        }));

        let artifacts =
            persist(&result, AnalysisKind::StorageAnalysis, root.path()).expect("persist");
        assert_eq!(
            artifacts[0].path().extension().and_then(|e| e.to_str()),
            Some("md")
        );
        assert!(artifacts[0].path().to_string_lossy().contains("storage-reports"));
    }

    #[test]
    fn test_same_day_rerun_overwrites() {
        let root = tempfile::tempdir().expect("tempdir");
        let first = result_from(serde_json::json!({
            "success": true, "data": { "dot": "digraph G { A; }" }
        }));
        let second = result_from(serde_json::json!({
            "success": true, "data": { "dot": "digraph G { B; }" }
        }));

        persist(&first, AnalysisKind::CallGraph, root.path()).expect("first");
        let artifacts = persist(&second, AnalysisKind::CallGraph, root.path()).expect("second");

        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            fs::read_to_string(artifacts[0].path()).expect("read"),
            "digraph G { B; }"
        );
        let entries = fs::read_dir(root.path().join("traverse-output/call-graphs"))
            .expect("read_dir")
            .count();
        assert_eq!(entries, 1, "last write wins, no numeric suffixing");
    }

    #[test]
    fn test_sniff_prefers_mermaid_over_dot_keywords() {
        assert_eq!(sniff_extension("graph TD\n  A --> B"), "mmd");
        assert_eq!(sniff_extension("flowchart LR\n  A --> B"), "mmd");
        assert_eq!(sniff_extension("digraph G { A -> B; }"), "dot");
        assert_eq!(sniff_extension("strict graph G { A -- B; }"), "dot");
        assert_eq!(sniff_extension("plain words"), "md");
    }
}
