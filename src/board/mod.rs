//! Board Projection: composes beads + sessions + git stats +
//! PR state into the reactive task list the UI observes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use chrono::{DateTime, Utc};

use crate::beads::{Bead, BeadStatus, BeadsClient, IssueType, PendingMutations};
use crate::config::Config;
use crate::git::pr::{GhCli, PrSummary};
use crate::git::GitAdapter;
use crate::session::{SessionManager, SessionRecord, SessionState};
use crate::worktree::WorktreeManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Draft,
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone)]
pub struct GitStatus {
    pub commits_behind: u32,
    pub has_uncommitted_changes: bool,
    pub additions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone)]
pub struct TaskWithSession {
    pub bead: Bead,
    pub session: Option<SessionRecord>,
    pub session_state_rank: u8,
    pub git_status: Option<GitStatus>,
    pub pr_state: Option<PrState>,
    pub parent_epic_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Session,
    Priority,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub statuses: std::collections::HashSet<BeadStatus>,
    pub priorities: std::collections::HashSet<u8>,
    pub types: std::collections::HashSet<IssueType>,
    pub session_states: std::collections::HashSet<SessionState>,
    pub age_days: Option<u32>,
    pub search: Option<String>,
}

/// Parses an RFC3339 `updated_at`; unparseable timestamps are treated as
/// "now" so a malformed bead never gets incorrectly excluded by age.
fn updated_age_days(updated_at: &str, now: DateTime<Utc>) -> u32 {
    match DateTime::parse_from_rfc3339(updated_at) {
        Ok(t) => (now - t.with_timezone(&Utc)).num_days().max(0) as u32,
        Err(_) => 0,
    }
}

struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        self.entries
            .get(key)
            .filter(|(inserted, _)| inserted.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    fn insert(&mut self, key: String, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }
}

fn pr_url_from_notes(notes: &str) -> Option<String> {
    let re = Regex::new(r"https?://[^\s]+/pull/\d+").ok()?;
    re.find(notes).map(|m| m.as_str().to_string())
}

fn map_gh_state(summary: &PrSummary) -> PrState {
    if summary.is_draft {
        return PrState::Draft;
    }
    match summary.state.as_str() {
        "MERGED" => PrState::Merged,
        "CLOSED" => PrState::Closed,
        _ => PrState::Open,
    }
}

/// Composes the denormalized task list on every refresh.
pub struct BoardProjection {
    project_path: std::path::PathBuf,
    config: Config,
    beads: BeadsClient,
    sessions: Arc<SessionManager>,
    worktrees: WorktreeManager,
    deps_cache: Mutex<TtlCache<HashMap<String, String>>>,
    git_status_cache: Mutex<TtlCache<GitStatus>>,
    pr_state_cache: Mutex<TtlCache<HashMap<String, PrState>>>,
    current_project_marker: Arc<Mutex<std::path::PathBuf>>,
}

impl BoardProjection {
    pub fn new(
        project_path: std::path::PathBuf,
        config: Config,
        beads: BeadsClient,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let worktrees = WorktreeManager::new(project_path.clone(), &config);
        let deps_ttl = Duration::from_secs(config.board.deps_cache_ttl_secs);
        let git_ttl = Duration::from_secs(config.board.git_status_cache_ttl_secs);
        Self {
            current_project_marker: Arc::new(Mutex::new(project_path.clone())),
            project_path,
            config,
            beads,
            sessions,
            worktrees,
            deps_cache: Mutex::new(TtlCache::new(deps_ttl)),
            git_status_cache: Mutex::new(TtlCache::new(git_ttl)),
            pr_state_cache: Mutex::new(TtlCache::new(git_ttl)),
        }
    }

    /// Batched, origin-mode PR-state lookup keyed by branch name. Best
    /// effort: if `gh` is missing or fails, returns an empty map and callers
    /// fall back to whatever can be inferred from bead notes.
    async fn pr_states(&self) -> HashMap<String, PrState> {
        const CACHE_KEY: &str = "pr-states";
        if let Some(cached) = self.pr_state_cache.lock().await.get(CACHE_KEY) {
            return cached;
        }

        let states = match GhCli::list_pr_states(&self.project_path).await {
            Ok(summaries) => summaries
                .iter()
                .map(|s| (s.head_ref_name.clone(), map_gh_state(s)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "gh pr list unavailable, PR state falls back to notes parsing");
                HashMap::new()
            }
        };

        self.pr_state_cache
            .lock()
            .await
            .insert(CACHE_KEY.to_string(), states.clone());
        states
    }

    /// Runs the refresh pipeline end to end. Discards the
    /// result silently if the current project changed mid-refresh.
    #[instrument(skip(self, pending))]
    pub async fn refresh(&self, pending: &PendingMutations) -> anyhow::Result<Vec<TaskWithSession>> {
        let started_for = self.project_path.clone();

        let beads = self
            .beads
            .list_with_sync_recovery()
            .await
            .map_err(anyhow::Error::from)?;

        let parent_epics = self.resolve_parent_epics(&beads).await;

        let active_sessions = self.sessions.list_active().await?;
        let sessions_by_bead: HashMap<String, SessionRecord> = active_sessions
            .into_iter()
            .map(|s| (s.bead_id.clone(), s))
            .collect();

        let worktree_entries = self.worktrees.list().await.unwrap_or_default();
        let worktree_set: std::collections::HashSet<String> =
            worktree_entries.into_iter().map(|e| e.bead_id).collect();

        let beads = BeadsClient::apply_pending(beads, pending);
        let gh_pr_states = self.pr_states().await;

        let mut tasks = Vec::with_capacity(beads.len());
        for bead in beads {
            let session = sessions_by_bead.get(&bead.id).cloned();
            let parent_epic_id = parent_epics.get(&bead.id).cloned();
            let has_worktree = session.is_some() || worktree_set.contains(&bead.id);

            let git_status = if has_worktree {
                let base_branch = parent_epics
                    .get(&bead.id)
                    .cloned()
                    .unwrap_or_else(|| self.config.git.base_branch.clone());
                self.git_status_for(&bead.id, &base_branch).await
            } else {
                None
            };

            let pr_state = if has_worktree {
                let branch = self.worktrees.branch_name(&bead.id);
                gh_pr_states.get(&branch).copied().or_else(|| {
                    bead.notes
                        .as_deref()
                        .and_then(pr_url_from_notes)
                        .map(|_| PrState::Open)
                })
            } else {
                None
            };

            let session_state_rank = session
                .as_ref()
                .map(|s| s.last_known_state.rank())
                .unwrap_or(crate::session::SessionState::Idle.rank());

            tasks.push(TaskWithSession {
                bead,
                session,
                session_state_rank,
                git_status,
                pr_state,
                parent_epic_id,
            });
        }

        if *self.current_project_marker.lock().await != started_for {
            anyhow::bail!("project switched mid-refresh, discarding result");
        }

        Ok(tasks)
    }

    async fn resolve_parent_epics(&self, beads: &[Bead]) -> HashMap<String, String> {
        let key = self.project_path.to_string_lossy().to_string();
        if let Some(cached) = self.deps_cache.lock().await.get(&key) {
            return cached;
        }

        let mut map = HashMap::new();
        for bead in beads {
            for dep in &bead.dependencies {
                if matches!(dep.kind, crate::beads::DependencyType::ParentChild) {
                    map.insert(bead.id.clone(), dep.other_id.clone());
                }
            }
        }
        self.deps_cache.lock().await.insert(key, map.clone());
        map
    }

    async fn git_status_for(&self, bead_id: &str, base_branch: &str) -> Option<GitStatus> {
        let worktree_path = self.worktrees.canonical_path(bead_id);
        let cache_key = format!("{}:{base_branch}", worktree_path.display());
        if let Some(cached) = self.git_status_cache.lock().await.get(&cache_key) {
            return Some(cached);
        }

        let adapter = GitAdapter::new(worktree_path);
        let commits_behind = adapter.commits_behind_base(base_branch).await.unwrap_or(0);
        let has_uncommitted_changes = adapter.has_uncommitted_changes().await.unwrap_or(false);

        let (additions, deletions) = match adapter.merge_base(base_branch).await {
            Ok(merge_base) => adapter
                .diff_numstat(&merge_base, "HEAD", &[])
                .await
                .unwrap_or((0, 0)),
            Err(e) => {
                warn!(error = %e, %bead_id, "failed to compute merge base for git status");
                (0, 0)
            }
        };

        let status = GitStatus {
            commits_behind,
            has_uncommitted_changes,
            additions,
            deletions,
        };
        self.git_status_cache.lock().await.insert(cache_key, status.clone());
        Some(status)
    }

    pub async fn mark_project_switched(&self, new_path: std::path::PathBuf) {
        *self.current_project_marker.lock().await = new_path;
    }

    /// Applies filter then sort. Every sort, regardless of field or
    /// direction, places tasks with an active session above idle ones first;
    /// the chosen field/direction only orders within those two groups.
    pub fn filter_and_sort(
        tasks: &[TaskWithSession],
        filter: &FilterConfig,
        field: SortField,
        direction: SortDirection,
    ) -> Vec<TaskWithSession> {
        let now = Utc::now();
        let mut filtered: Vec<TaskWithSession> = tasks
            .iter()
            .filter(|t| t.parent_epic_id.is_none())
            .filter(|t| filter.statuses.is_empty() || filter.statuses.contains(&t.bead.status))
            .filter(|t| filter.priorities.is_empty() || filter.priorities.contains(&t.bead.priority))
            .filter(|t| filter.types.is_empty() || filter.types.contains(&t.bead.issue_type))
            .filter(|t| {
                filter.session_states.is_empty()
                    || t.session
                        .as_ref()
                        .is_some_and(|s| filter.session_states.contains(&s.last_known_state))
            })
            .filter(|t| match filter.age_days {
                Some(min_age) => updated_age_days(&t.bead.updated_at, now) >= min_age,
                None => true,
            })
            .filter(|t| match &filter.search {
                Some(q) => t.bead.title.to_lowercase().contains(&q.to_lowercase()),
                None => true,
            })
            .cloned()
            .collect();

        fn active_rank(t: &TaskWithSession) -> u8 {
            if t.session.is_some() {
                0
            } else {
                1
            }
        }

        filtered.sort_by(|a, b| {
            let grouping = active_rank(a).cmp(&active_rank(b));

            let primary = match field {
                SortField::Session => a.session_state_rank.cmp(&b.session_state_rank),
                SortField::Priority => a.bead.priority.cmp(&b.bead.priority),
                SortField::Updated => b.bead.updated_at.cmp(&a.bead.updated_at),
            };
            let directed = match direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };

            grouping
                .then(directed)
                .then_with(|| b.bead.updated_at.cmp(&a.bead.updated_at))
                .then_with(|| a.bead.priority.cmp(&b.bead.priority))
        });

        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_url_extraction_finds_pull_link() {
        let notes = "see https://github.com/acme/repo/pull/42 for context";
        assert_eq!(
            pr_url_from_notes(notes),
            Some("https://github.com/acme/repo/pull/42".to_string())
        );
    }

    #[test]
    fn pr_url_extraction_none_when_absent() {
        assert_eq!(pr_url_from_notes("no link here"), None);
    }

    fn bare_task(id: &str, priority: u8, session: Option<SessionRecord>) -> TaskWithSession {
        let session_state_rank = session
            .as_ref()
            .map(|s| s.last_known_state.rank())
            .unwrap_or(SessionState::Idle.rank());
        TaskWithSession {
            bead: Bead {
                id: id.to_string(),
                title: format!("bead {id}"),
                status: BeadStatus::Open,
                issue_type: IssueType::Task,
                priority,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:00Z".to_string(),
                description: None,
                notes: None,
                design: None,
                dependencies: Vec::new(),
            },
            session,
            session_state_rank,
            git_status: None,
            pr_state: None,
            parent_epic_id: None,
        }
    }

    fn session_record(bead_id: &str) -> SessionRecord {
        SessionRecord {
            bead_id: bead_id.to_string(),
            tmux_session_name: format!("az-{bead_id}"),
            worktree_path: std::path::PathBuf::from("/tmp"),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            last_known_state: SessionState::Busy,
        }
    }

    #[test]
    fn active_sessions_sort_above_idle_regardless_of_field() {
        let idle_high_priority = bare_task("idle-high", 0, None);
        let active_low_priority = bare_task("active-low", 9, Some(session_record("active-low")));

        let tasks = vec![idle_high_priority, active_low_priority];
        let sorted = BoardProjection::filter_and_sort(
            &tasks,
            &FilterConfig::default(),
            SortField::Priority,
            SortDirection::Asc,
        );

        assert_eq!(sorted[0].bead.id, "active-low");
        assert_eq!(sorted[1].bead.id, "idle-high");
    }

    #[test]
    fn age_filter_excludes_recently_updated_tasks() {
        let mut old = bare_task("old", 1, None);
        old.bead.updated_at = "2020-01-01T00:00:00Z".to_string();
        let mut recent = bare_task("recent", 1, None);
        recent.bead.updated_at = Utc::now().to_rfc3339();

        let filter = FilterConfig {
            age_days: Some(30),
            ..Default::default()
        };
        let sorted = BoardProjection::filter_and_sort(
            &[old, recent],
            &filter,
            SortField::Priority,
            SortDirection::Asc,
        );

        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].bead.id, "old");
    }
}
