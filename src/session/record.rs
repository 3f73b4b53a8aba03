//! Session Record persistence: `.azedarach/sessions.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Busy,
    Waiting,
    Paused,
    Done,
    Error,
    Crashed,
    /// Not a state the adapter reports directly, but referenced by the
    /// Board Projection's session rank table and the monitor's crash-tracking
    /// fallback when the adapter itself is unreliable.
    Warning,
    Unknown,
}

impl SessionState {
    /// Rank used by the Board Projection's `session` sort.
    pub fn rank(self) -> u8 {
        match self {
            SessionState::Initializing => 0,
            SessionState::Busy => 1,
            SessionState::Warning => 2,
            SessionState::Waiting => 3,
            SessionState::Paused => 4,
            SessionState::Crashed => 5,
            SessionState::Done => 6,
            SessionState::Error => 7,
            SessionState::Idle => 8,
            SessionState::Unknown => 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub bead_id: String,
    pub tmux_session_name: String,
    pub worktree_path: PathBuf,
    pub started_at: String,
    pub last_known_state: SessionState,
}

/// `beadId -> SessionRecord`, at most one record per bead.
#[derive(Debug, Default)]
pub struct SessionStore {
    records: HashMap<String, SessionRecord>,
}

impl SessionStore {
    pub fn path(project_path: &Path) -> PathBuf {
        crate::config::Config::state_dir(project_path).join("sessions.json")
    }

    pub fn load(project_path: &Path) -> Result<Self> {
        let path = Self::path(project_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).context("failed to read sessions.json")?;
        let records: Vec<SessionRecord> =
            serde_json::from_str(&text).context("invalid sessions.json")?;
        Ok(Self {
            records: records.into_iter().map(|r| (r.bead_id.clone(), r)).collect(),
        })
    }

    pub fn save(&self, project_path: &Path) -> Result<()> {
        let path = Self::path(project_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create .azedarach directory")?;
        }
        let records: Vec<&SessionRecord> = self.records.values().collect();
        let json = serde_json::to_string_pretty(&records).context("failed to serialize sessions")?;
        std::fs::write(&path, json).context("failed to write sessions.json")?;
        Ok(())
    }

    pub fn get(&self, bead_id: &str) -> Option<&SessionRecord> {
        self.records.get(bead_id)
    }

    pub fn insert(&mut self, record: SessionRecord) {
        self.records.insert(record.bead_id.clone(), record);
    }

    pub fn remove(&mut self, bead_id: &str) -> Option<SessionRecord> {
        self.records.remove(bead_id)
    }

    pub fn set_state(&mut self, bead_id: &str, state: SessionState) {
        if let Some(record) = self.records.get_mut(bead_id) {
            record.last_known_state = state;
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &SessionRecord> {
        self.records.values()
    }
}
