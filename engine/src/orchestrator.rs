//! Command orchestrator - the façade the host drives.
//!
//! For each analysis command it ensures a running session (locating or,
//! with the user's consent, downloading a server binary), sends the
//! request, and routes the result to the persister. Every failure resolves
//! to a notification; errors never escape this boundary, and only this
//! component initiates provisioning.

use std::path::{Path, PathBuf};

use traverse_client::{LaunchSpec, ServerSession, SessionError};
use traverse_config::Settings;
use traverse_provision::{ReleaseFeed, locate};
use traverse_types::{AnalysisKind, CommandRequest, PersistedArtifact};

use crate::persist;

/// User-facing surface of the orchestrator. The host implements this to
/// show notifications and to answer the download consent prompt.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    /// Whether the user agrees to download the server binary.
    fn confirm_download(&self) -> bool;
}

/// Owns the single server session and everything needed to (re)create it.
pub struct Orchestrator {
    session: Option<ServerSession>,
    settings: Settings,
    feed: ReleaseFeed,
    notifier: Box<dyn Notifier>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(settings: Settings, feed: ReleaseFeed, notifier: Box<dyn Notifier>) -> Self {
        Self {
            session: None,
            settings,
            feed,
            notifier,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one analysis and persist whatever it returns.
    ///
    /// All failure paths notify the user and return an empty list.
    pub async fn execute(
        &mut self,
        kind: AnalysisKind,
        workspace_root: &Path,
    ) -> Vec<PersistedArtifact> {
        let request =
            CommandRequest::new(kind, workspace_root.to_path_buf(), self.settings.chunking);

        let outcome = match self.ensure_session(workspace_root).await {
            Some(session) => session.execute(&request).await,
            None => return Vec::new(),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.notifier
                    .error(&format!("{} generation failed: {e}", kind.label()));
                // A closed or desynchronized session is useless; drop it so
                // the next command re-provisions transparently.
                if matches!(e, SessionError::Closed | SessionError::Protocol(_)) {
                    self.discard_session().await;
                }
                return Vec::new();
            }
        };

        if !result.success() {
            self.notifier
                .error(&format!("Server reported {} generation failed", kind.label()));
            return Vec::new();
        }

        match persist::persist(&result, kind, workspace_root) {
            Ok(artifacts) if artifacts.is_empty() => {
                self.notifier
                    .info(&format!("No {} output to save", kind.label()));
                artifacts
            }
            Ok(artifacts) => {
                let paths: Vec<String> = artifacts
                    .iter()
                    .map(|a| a.path().display().to_string())
                    .collect();
                self.notifier
                    .info(&format!("Saved {}: {}", kind.label(), paths.join(", ")));
                artifacts
            }
            Err(e) => {
                self.notifier
                    .error(&format!("Failed to save {} output: {e}", kind.label()));
                Vec::new()
            }
        }
    }

    /// Run all three analyses in sequence, tolerating individual failures.
    pub async fn execute_all(&mut self, workspace_root: &Path) -> Vec<PersistedArtifact> {
        let mut all = Vec::new();
        for kind in AnalysisKind::ALL {
            all.extend(self.execute(kind, workspace_root).await);
        }
        all
    }

    /// Explicitly fetch the latest server build. The command itself is the
    /// consent, so no prompt here.
    pub async fn download_server(&mut self) {
        match self.feed.download_latest().await {
            Ok(installed) => self.notifier.info(&format!(
                "Downloaded analysis server {} to {}",
                installed.version(),
                installed.path().display()
            )),
            Err(e) => self
                .notifier
                .error(&format!("Could not download analysis server: {e}")),
        }
    }

    /// Stop and relaunch the running server with the same parameters.
    pub async fn restart_server(&mut self) {
        match self.session.take() {
            Some(session) => match session.restart().await {
                Ok(session) => {
                    self.session = Some(session);
                    self.notifier.info("Analysis server restarted");
                }
                Err(e) => self
                    .notifier
                    .error(&format!("Could not restart analysis server: {e}")),
            },
            None => self.notifier.info("Analysis server is not running"),
        }
    }

    /// Start the server if it is not already running, provisioning a
    /// binary if needed. Returns whether a running session exists after.
    pub async fn ensure_started(&mut self, workspace_root: &Path) -> bool {
        self.ensure_session(workspace_root).await.is_some()
    }

    /// Stop the server, if any. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
    }

    /// Hand out a running session, provisioning and starting one if needed.
    async fn ensure_session(&mut self, workspace_root: &Path) -> Option<&mut ServerSession> {
        // A crashed session is discarded and replaced transparently.
        if self.session.as_ref().is_some_and(|s| !s.is_running()) {
            self.notifier
                .info("Analysis server stopped unexpectedly; relaunching it");
            self.discard_session().await;
        }

        if self.session.is_none() {
            let binary = self.provision_binary().await?;
            let launch = self.launch_spec(binary, workspace_root);
            match ServerSession::start(launch).await {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    self.notifier
                        .error(&format!("Could not start analysis server: {e}"));
                    return None;
                }
            }
        }
        self.session.as_mut()
    }

    /// Locate a binary, or download one with the user's consent.
    async fn provision_binary(&mut self) -> Option<PathBuf> {
        if let Some(found) = locate(
            self.feed.storage_dir(),
            self.settings.server_path_override(),
        ) {
            tracing::debug!(
                path = %found.path().display(),
                source = ?found.source(),
                "Using server binary"
            );
            return Some(found.path().to_path_buf());
        }

        if !self.notifier.confirm_download() {
            self.notifier
                .error("Analysis server binary not found and download was declined");
            return None;
        }
        match self.feed.download_latest().await {
            Ok(installed) => {
                self.notifier
                    .info(&format!("Downloaded analysis server {}", installed.version()));
                Some(installed.path().to_path_buf())
            }
            Err(e) => {
                self.notifier
                    .error(&format!("Could not download analysis server: {e}"));
                None
            }
        }
    }

    fn launch_spec(&self, binary: PathBuf, workspace_root: &Path) -> LaunchSpec {
        let log_level = if self.settings.trace_level == "off" {
            "info"
        } else {
            "debug"
        };
        LaunchSpec::new(binary, workspace_root.to_path_buf())
            .env("TRAVERSE_LOG", log_level)
            .env("TRAVERSE_TRACE", self.settings.trace_level.as_str())
            .env("TRAVERSE_MAX_PROBLEMS", self.settings.max_problems.to_string())
    }

    async fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
    }
}
