//! Session Manager: per-bead session lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::git::{GitAdapter, GitError};
use crate::overlay::OverlayService;
use crate::tmux::naming::session_name_for_bead;
use crate::tmux::TmuxClient;
use crate::worktree::WorktreeManager;

use super::record::{SessionRecord, SessionState, SessionStore};

const MERGE_WINDOW: &str = "merge";

/// Outcome of [`SessionManager::merge_from_base`].
#[derive(Debug, Clone)]
pub enum MergeResult {
    Merged,
    Conflict { files: Vec<String> },
}

pub struct StartOptions {
    pub with_work: bool,
    pub yolo: bool,
}

/// The literal agent start prompt, with `<beadId>`/`<taskInfo>`
/// substituted.
pub fn agent_start_prompt(bead_id: &str, task_info: &str) -> String {
    format!(
        "work on bead {bead_id} ({task_info})\n\n\
         Run `bd show {bead_id}` to see full description and context.\n\n\
         Before starting implementation:\n\
         1. If ANYTHING is unclear or underspecified, ASK ME questions before proceeding\n\
         2. Once you understand the task, update the bead with your implementation plan using `bd update {bead_id} --design=\"...\"`\n\n\
         Goal: Make this bead self-sufficient so any future session could pick it up without extra context."
    )
}

/// Owns the per-bead [`SessionRecord`] map for one project.
pub struct SessionManager {
    project_path: PathBuf,
    config: Config,
    tmux: Arc<dyn TmuxClient>,
    worktrees: WorktreeManager,
    store: Mutex<SessionStore>,
}

impl SessionManager {
    pub fn new(project_path: PathBuf, config: Config, tmux: Arc<dyn TmuxClient>) -> Result<Self> {
        let store = SessionStore::load(&project_path)?;
        let worktrees = WorktreeManager::new(project_path.clone(), &config);
        Ok(Self {
            project_path,
            config,
            tmux,
            worktrees,
            store: Mutex::new(store),
        })
    }

    fn base_command(&self, opts: &StartOptions, bead_id: &str) -> String {
        let base = &self.config.session.command;
        let mut cmd = if opts.with_work {
            format!("{base} \"{}\"", agent_start_prompt(bead_id, ""))
        } else {
            base.clone()
        };
        if opts.yolo {
            cmd.push_str(" --dangerously-skip-permissions");
        }
        cmd
    }

    /// (i) ensure the worktree, (ii) compute the deterministic tmux session
    /// name, (iii) create or attach, (iv) publish a Session Record in
    /// `busy` state.
    #[instrument(skip(self, opts), fields(bead_id))]
    pub async fn start(
        &self,
        bead_id: &str,
        opts: StartOptions,
        parent_epic_path: Option<&Path>,
    ) -> Result<SessionRecord> {
        let worktree_path = self.worktrees.ensure(bead_id, parent_epic_path).await?;
        let session_name = session_name_for_bead(bead_id);

        if !self.tmux.has_session(&session_name)? {
            self.tmux.new_session(&session_name, &worktree_path)?;

            for cmd in &self.config.session.background_tasks {
                let window = format!("bg-{}", uuid::Uuid::new_v4().simple());
                if let Err(e) =
                    self.tmux
                        .new_window(&session_name, &window, &worktree_path, Some(cmd))
                {
                    warn!(error = %e, command = %cmd, "failed to start background task window");
                }
            }

            let start_cmd = self.base_command(&opts, bead_id);
            self.tmux.send_keys(&session_name, &start_cmd, true)?;
        } else {
            info!(%session_name, "session already exists, attaching instead of creating");
        }

        let record = SessionRecord {
            bead_id: bead_id.to_string(),
            tmux_session_name: session_name,
            worktree_path,
            started_at: Utc::now().to_rfc3339(),
            last_known_state: SessionState::Busy,
        };

        let mut store = self.store.lock().await;
        store.insert(record.clone());
        store.save(&self.project_path)?;
        Ok(record)
    }

    /// Send Ctrl-C to the main window; best-effort `wipCommit`; mark paused.
    #[instrument(skip(self), fields(bead_id))]
    pub async fn pause(&self, bead_id: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let record = store
            .get(bead_id)
            .cloned_record()
            .context("no session to pause")?;

        self.tmux.send_keys(&record.tmux_session_name, "\x03", false)?;

        let adapter = GitAdapter::new(record.worktree_path.clone());
        if let Err(e) = adapter.wip_commit().await {
            warn!(error = %e, "best-effort wip commit failed during pause");
        }

        store.set_state(bead_id, SessionState::Paused);
        store.save(&self.project_path)?;
        Ok(())
    }

    #[instrument(skip(self), fields(bead_id))]
    pub async fn resume(&self, bead_id: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let record = store
            .get(bead_id)
            .cloned_record()
            .context("no session to resume")?;

        let cmd = self.config.session.command.clone();
        self.tmux.send_keys(&record.tmux_session_name, &cmd, true)?;

        store.set_state(bead_id, SessionState::Busy);
        store.save(&self.project_path)?;
        Ok(())
    }

    /// Merge the configured base branch into the bead's worktree. On a
    /// clean merge the session keeps running undisturbed. On conflict, opens
    /// a dedicated `merge` window, drops the agent a prompt naming the
    /// conflicting files, and raises a warning toast — the session stays
    /// `busy` either way, there is no error state to transition into.
    #[instrument(skip(self, overlay), fields(bead_id))]
    pub async fn merge_from_base(
        &self,
        bead_id: &str,
        overlay: &OverlayService,
    ) -> Result<MergeResult> {
        let record = {
            let store = self.store.lock().await;
            store
                .get(bead_id)
                .cloned_record()
                .context("no session to merge")?
        };

        let adapter = GitAdapter::new(record.worktree_path.clone());
        match adapter.merge_from_base(&self.config.git.base_branch).await {
            Ok(()) => Ok(MergeResult::Merged),
            Err(GitError::MergeConflict(files)) => {
                let target = format!("{}:{MERGE_WINDOW}", record.tmux_session_name);
                if !self.tmux.has_window(&record.tmux_session_name, MERGE_WINDOW)? {
                    self.tmux.new_window(
                        &record.tmux_session_name,
                        MERGE_WINDOW,
                        &record.worktree_path,
                        None,
                    )?;
                }
                self.tmux.select_window(&target)?;

                let file_list = files.join(", ");
                let prompt = format!(
                    "This branch has merge conflicts in: {file_list}\n\n\
                     Please resolve the merge conflicts above, then commit the merge \
                     and let me know when it's done."
                );
                self.tmux.send_keys(&target, &prompt, true)?;

                overlay.warning(format!(
                    "bead {bead_id} has merge conflicts in {file_list}"
                ));
                warn!(%bead_id, %file_list, "merge produced conflicts, handed to agent");
                Ok(MergeResult::Conflict { files })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Kill the tmux session; remove the Session Record; leave the worktree.
    #[instrument(skip(self), fields(bead_id))]
    pub async fn stop(&self, bead_id: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(record) = store.get(bead_id) {
            let _ = self.tmux.kill_session(&record.tmux_session_name);
        }
        store.remove(bead_id);
        store.save(&self.project_path)?;
        Ok(())
    }

    #[instrument(skip(self), fields(bead_id))]
    pub async fn cleanup(&self, bead_id: &str) -> Result<()> {
        self.stop(bead_id).await?;
        self.worktrees.delete(bead_id).await?;
        Ok(())
    }

    /// Re-create the tmux session for an existing worktree with the resume
    /// command.
    #[instrument(skip(self), fields(bead_id))]
    pub async fn recover(&self, bead_id: &str) -> Result<SessionRecord> {
        let worktree_path = self.worktrees.canonical_path(bead_id);
        if !worktree_path.exists() {
            anyhow::bail!("cannot recover {bead_id}: worktree missing at {worktree_path:?}");
        }
        let session_name = session_name_for_bead(bead_id);
        self.tmux.new_session(&session_name, &worktree_path)?;
        let cmd = self.config.session.command.clone();
        self.tmux.send_keys(&session_name, &cmd, true)?;

        let record = SessionRecord {
            bead_id: bead_id.to_string(),
            tmux_session_name: session_name,
            worktree_path,
            started_at: Utc::now().to_rfc3339(),
            last_known_state: SessionState::Busy,
        };
        let mut store = self.store.lock().await;
        store.insert(record.clone());
        store.save(&self.project_path)?;
        info!(%bead_id, "session recovered");
        Ok(record)
    }

    /// Every session record whose tmux session is currently present.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<SessionRecord>> {
        let store = self.store.lock().await;
        let live = self.tmux.list_sessions()?;
        let live_names: std::collections::HashSet<_> = live.into_iter().map(|s| s.name).collect();
        Ok(store
            .all()
            .filter(|r| live_names.contains(&r.tmux_session_name))
            .cloned()
            .collect())
    }

    /// Compares persisted records against the live tmux session list; any
    /// record without a live session transitions to `crashed`. Returns the
    /// bead ids that newly transitioned.
    #[instrument(skip(self))]
    pub async fn detect_crashes(&self) -> Result<Vec<String>> {
        let live = self.tmux.list_sessions()?;
        let live_names: std::collections::HashSet<_> = live.into_iter().map(|s| s.name).collect();

        let mut store = self.store.lock().await;
        let mut crashed = Vec::new();
        let ids: Vec<String> = store.all().map(|r| r.bead_id.clone()).collect();
        for id in ids {
            let Some(record) = store.get(&id) else {
                continue;
            };
            if !live_names.contains(&record.tmux_session_name)
                && record.last_known_state != SessionState::Crashed
            {
                store.set_state(&id, SessionState::Crashed);
                crashed.push(id);
            }
        }
        if !crashed.is_empty() {
            store.save(&self.project_path)?;
        }
        Ok(crashed)
    }
}

trait OptionRecordExt {
    fn cloned_record(self) -> Option<SessionRecord>;
}

impl OptionRecordExt for Option<&SessionRecord> {
    fn cloned_record(self) -> Option<SessionRecord> {
        self.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_start_prompt_contains_bead_id_and_instructions() {
        let prompt = agent_start_prompt("az-1", "fix the thing");
        assert!(prompt.starts_with("work on bead az-1 (fix the thing)"));
        assert!(prompt.contains("bd show az-1"));
        assert!(prompt.contains("ASK ME questions"));
    }
}
