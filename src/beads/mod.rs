//! Beads Client: structured calls to the external `bd` CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Task,
    Bug,
    Feature,
    Chore,
    Epic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    ParentChild,
    Related,
    DiscoveredFrom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub other_id: String,
    #[serde(rename = "type")]
    pub kind: DependencyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub status: BeadStatus,
    pub issue_type: IssueType,
    pub priority: u8,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub design: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Default)]
pub struct BeadFields {
    pub title: Option<String>,
    pub status: Option<BeadStatus>,
    pub priority: Option<u8>,
    pub description: Option<String>,
}

#[derive(Error, Debug)]
pub enum BeadsError {
    #[error("bd reports database out of sync with on-disk JSONL")]
    SyncRequired,

    #[error("bead not found: {0}")]
    NotFound(String),

    #[error("bd CLI is not installed")]
    ToolMissing,

    #[error("bd exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },
}

/// Mutations pending against a bead that have not yet been confirmed by a
/// real `bd` read. Consulted by the Beads Client when formatting results
/// for the Board Projection.
#[derive(Debug, Clone)]
pub enum PendingMutation {
    Move(BeadStatus),
    Update(BeadFields),
    Delete,
}

pub type PendingMutations = HashMap<String, PendingMutation>;

/// Thin wrapper over the `bd` CLI. Keyed on the project's tracker path.
pub struct BeadsClient {
    project_path: PathBuf,
}

impl BeadsClient {
    pub fn new(project_path: PathBuf) -> Self {
        Self { project_path }
    }

    async fn run(&self, args: &[&str]) -> Result<String, BeadsError> {
        if which::which("bd").is_err() {
            return Err(BeadsError::ToolMissing);
        }

        debug!(?args, "running bd");
        let output = Command::new("bd")
            .args(args)
            .current_dir(&self.project_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|_| BeadsError::ToolMissing)?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            if stderr.to_lowercase().contains("out of sync")
                || stderr.to_lowercase().contains("sync required")
            {
                return Err(BeadsError::SyncRequired);
            }
            if stderr.to_lowercase().contains("not found") {
                return Err(BeadsError::NotFound(args.last().unwrap_or(&"").to_string()));
            }
            return Err(BeadsError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(stdout)
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Bead>, BeadsError> {
        let out = self.run(&["list", "--json"]).await?;
        serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd list output: {e}"),
        })
    }

    #[instrument(skip(self))]
    pub async fn show(&self, id: &str) -> Result<Bead, BeadsError> {
        let out = self.run(&["show", id, "--json"]).await?;
        serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd show output: {e}"),
        })
    }

    #[instrument(skip(self, ids))]
    pub async fn show_multiple(&self, ids: &[String]) -> Result<Vec<Bead>, BeadsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<&str> = vec!["show", "--json"];
        args.extend(ids.iter().map(String::as_str));
        let out = self.run(&args).await?;
        serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd show output: {e}"),
        })
    }

    #[instrument(skip(self, fields))]
    pub async fn create(&self, fields: &BeadFields) -> Result<String, BeadsError> {
        let mut args = vec!["create".to_string()];
        if let Some(title) = &fields.title {
            args.push("--title".to_string());
            args.push(title.clone());
        }
        if let Some(desc) = &fields.description {
            args.push("--description".to_string());
            args.push(desc.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run(&arg_refs).await?;
        Ok(out.trim().to_string())
    }

    #[instrument(skip(self, fields))]
    pub async fn update(&self, id: &str, fields: &BeadFields) -> Result<(), BeadsError> {
        let mut args = vec!["update".to_string(), id.to_string()];
        if let Some(title) = &fields.title {
            args.push("--title".to_string());
            args.push(title.clone());
        }
        if let Some(priority) = fields.priority {
            args.push("--priority".to_string());
            args.push(priority.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        Ok(())
    }

    pub async fn update_notes(&self, id: &str, text: &str) -> Result<(), BeadsError> {
        self.run(&["update", id, "--notes", text]).await?;
        Ok(())
    }

    pub async fn append_notes(&self, id: &str, text: &str) -> Result<(), BeadsError> {
        self.run(&["update", id, "--append-notes", text]).await?;
        Ok(())
    }

    pub async fn update_status(&self, id: &str, status: BeadStatus) -> Result<(), BeadsError> {
        let status_str = match status {
            BeadStatus::Open => "open",
            BeadStatus::InProgress => "in_progress",
            BeadStatus::Blocked => "blocked",
            BeadStatus::Closed => "closed",
        };
        self.run(&["update", id, "--status", status_str]).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), BeadsError> {
        self.run(&["delete", id]).await?;
        Ok(())
    }

    pub async fn search(&self, pattern: &str) -> Result<Vec<Bead>, BeadsError> {
        let out = self.run(&["search", pattern, "--json"]).await?;
        serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd search output: {e}"),
        })
    }

    pub async fn ready(&self) -> Result<Vec<Bead>, BeadsError> {
        let out = self.run(&["ready", "--json"]).await?;
        serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd ready output: {e}"),
        })
    }

    pub async fn add_dependency(
        &self,
        a: &str,
        b: &str,
        kind: DependencyType,
    ) -> Result<(), BeadsError> {
        let kind_str = match kind {
            DependencyType::Blocks => "blocks",
            DependencyType::ParentChild => "parent-child",
            DependencyType::Related => "related",
            DependencyType::DiscoveredFrom => "discovered-from",
        };
        self.run(&["dep", "add", a, b, "--type", kind_str]).await?;
        Ok(())
    }

    pub async fn remove_dependency(&self, a: &str, b: &str) -> Result<(), BeadsError> {
        self.run(&["dep", "remove", a, b]).await?;
        Ok(())
    }

    /// Re-imports the on-disk JSONL into `bd`'s database. Invoked by the
    /// Board Projection exactly once on `SyncRequired` before retrying the
    /// failing read.
    #[instrument(skip(self))]
    pub async fn sync_import_only(&self) -> Result<(), BeadsError> {
        self.run(&["sync", "--import-only"]).await?;
        Ok(())
    }

    /// Fetches `id` and its parent-child dependents in one call.
    #[instrument(skip(self))]
    pub async fn get_epic_with_children(
        &self,
        id: &str,
    ) -> Result<(Bead, Vec<Bead>), BeadsError> {
        let epic = self.show(id).await?;
        let out = self.run(&["children", id, "--json"]).await?;
        let children: Vec<Bead> = serde_json::from_str(&out).map_err(|e| BeadsError::CommandFailed {
            code: -1,
            stderr: format!("failed to parse bd children output: {e}"),
        })?;
        Ok((epic, children))
    }

    /// Calls [`Self::list`], auto-recovering from `SyncRequired` exactly
    /// once via [`Self::sync_import_only`].
    #[instrument(skip(self))]
    pub async fn list_with_sync_recovery(&self) -> Result<Vec<Bead>, BeadsError> {
        match self.list().await {
            Err(BeadsError::SyncRequired) => {
                warn!("bd reported SyncRequired, running sync --import-only and retrying once");
                self.sync_import_only().await?;
                self.list().await
            }
            other => other,
        }
    }

    /// Overlay `pending` on top of a raw read: Move overrides status,
    /// Update merges fields, Delete omits the bead entirely.
    pub fn apply_pending(mut beads: Vec<Bead>, pending: &PendingMutations) -> Vec<Bead> {
        beads.retain(|b| !matches!(pending.get(&b.id), Some(PendingMutation::Delete)));
        for bead in &mut beads {
            match pending.get(&bead.id) {
                Some(PendingMutation::Move(status)) => bead.status = *status,
                Some(PendingMutation::Update(fields)) => {
                    if let Some(title) = &fields.title {
                        bead.title = title.clone();
                    }
                    if let Some(status) = fields.status {
                        bead.status = status;
                    }
                    if let Some(priority) = fields.priority {
                        bead.priority = priority;
                    }
                    if let Some(desc) = &fields.description {
                        bead.description = Some(desc.clone());
                    }
                }
                _ => {}
            }
        }
        beads
    }
}

impl AsRef<Path> for BeadsClient {
    fn as_ref(&self) -> &Path {
        &self.project_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bead(id: &str, status: BeadStatus) -> Bead {
        Bead {
            id: id.to_string(),
            title: "t".to_string(),
            status,
            issue_type: IssueType::Task,
            priority: 2,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            description: None,
            notes: None,
            design: None,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn apply_pending_move_overrides_status() {
        let beads = vec![bead("az-1", BeadStatus::Open)];
        let mut pending = PendingMutations::new();
        pending.insert("az-1".to_string(), PendingMutation::Move(BeadStatus::InProgress));
        let result = BeadsClient::apply_pending(beads, &pending);
        assert_eq!(result[0].status, BeadStatus::InProgress);
    }

    #[test]
    fn apply_pending_delete_omits_bead() {
        let beads = vec![bead("az-1", BeadStatus::Open), bead("az-2", BeadStatus::Open)];
        let mut pending = PendingMutations::new();
        pending.insert("az-1".to_string(), PendingMutation::Delete);
        let result = BeadsClient::apply_pending(beads, &pending);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "az-2");
    }
}
