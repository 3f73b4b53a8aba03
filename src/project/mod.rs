//! Project Service: discover/switch projects, persist
//! per-project UI state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

use crate::beads::BeadStatus;
use crate::board::{FilterConfig, SortDirection, SortField};
use crate::projects::discover_projects;

fn parse_bead_status(s: &str) -> Option<BeadStatus> {
    match s {
        "open" => Some(BeadStatus::Open),
        "in_progress" => Some(BeadStatus::InProgress),
        "blocked" => Some(BeadStatus::Blocked),
        "closed" => Some(BeadStatus::Closed),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Kanban,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedUiState {
    pub focused_bead_id: Option<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub priorities: Vec<u8>,
    pub age_days: Option<u32>,
    pub search: Option<String>,
    #[serde(default = "default_sort_field")]
    pub sort_field: String,
    #[serde(default)]
    pub sort_desc: bool,
    #[serde(default = "default_view_mode")]
    pub view_mode: String,
}

fn default_sort_field() -> String {
    "session".to_string()
}
fn default_view_mode() -> String {
    "kanban".to_string()
}

#[derive(Debug, Clone)]
pub enum ProjectEvent {
    Changed { path: PathBuf },
}

pub struct ProjectService {
    projects_root: PathBuf,
    current: Mutex<PathBuf>,
    events: mpsc::UnboundedSender<ProjectEvent>,
}

impl ProjectService {
    pub fn new(
        projects_root: PathBuf,
        initial: PathBuf,
        events: mpsc::UnboundedSender<ProjectEvent>,
    ) -> Self {
        Self {
            projects_root,
            current: Mutex::new(initial),
            events,
        }
    }

    pub fn discover_all(&self) -> Vec<String> {
        discover_projects(&self.projects_root)
    }

    pub async fn get_current_path(&self) -> PathBuf {
        self.current.lock().await.clone()
    }

    /// Publishes `ProjectChanged`; callers (Board Projection, UI state)
    /// react by clearing per-project state and restoring the target
    /// project's saved view.
    #[instrument(skip(self))]
    pub async fn switch_to(&self, path: PathBuf) -> Result<()> {
        *self.current.lock().await = path.clone();
        let _ = self.events.send(ProjectEvent::Changed { path });
        Ok(())
    }

    /// Bootstraps the `bd` tracker inside `project` if not already present.
    #[instrument(skip(self))]
    pub async fn init_beads(&self, project: &Path) -> Result<()> {
        if which::which("bd").is_err() {
            anyhow::bail!("bd CLI is not installed; cannot initialize tracker");
        }
        let output = tokio::process::Command::new("bd")
            .arg("init")
            .current_dir(project)
            .output()
            .await
            .context("failed to run bd init")?;
        if !output.status.success() {
            anyhow::bail!(
                "bd init failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    fn state_path(project: &Path) -> PathBuf {
        crate::config::Config::state_dir(project).join("project-state.json")
    }

    pub fn load_ui_state(project: &Path) -> PersistedUiState {
        let path = Self::state_path(project);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Debounced save is the caller's responsibility (a 500 ms coalesce
    /// timer around calls to this), matching the Board Projection's
    /// debounce idiom.
    pub fn save_ui_state(project: &Path, state: &PersistedUiState) -> Result<()> {
        let path = Self::state_path(project);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }

    pub fn to_filter_config(state: &PersistedUiState) -> FilterConfig {
        FilterConfig {
            statuses: state.statuses.iter().filter_map(|s| parse_bead_status(s)).collect(),
            priorities: state.priorities.iter().copied().collect(),
            age_days: state.age_days,
            search: state.search.clone(),
        }
    }

    pub fn sort_field_from_str(s: &str) -> SortField {
        match s {
            "priority" => SortField::Priority,
            "updated" => SortField::Updated,
            _ => SortField::Session,
        }
    }

    pub fn sort_direction(desc: bool) -> SortDirection {
        if desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_load_round_trips_ui_state() {
        let temp = TempDir::new().unwrap();
        let mut state = PersistedUiState::default();
        state.focused_bead_id = Some("az-4".to_string());
        state.sort_field = "priority".to_string();

        ProjectService::save_ui_state(temp.path(), &state).unwrap();
        let loaded = ProjectService::load_ui_state(temp.path());
        assert_eq!(loaded.focused_bead_id, Some("az-4".to_string()));
        assert_eq!(loaded.sort_field, "priority");
    }
}
