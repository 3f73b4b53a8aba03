//! End-to-end scenario tests against the literal cases in the design
//! notes: single session lifecycle, dev-server port allocation, merge
//! conflict handling, optimistic mutation overlay, and crash recovery.
//! Most pre-create the canonical worktree directory on disk so
//! `WorktreeManager::ensure` takes its already-exists fast path and never
//! shells out to `git`; the merge-conflict scenario needs a real worktree,
//! so it shells out to a real `git` binary to build one.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use azedarach::beads::{Bead, BeadStatus, IssueType, PendingMutation, PendingMutations, BeadsClient};
use azedarach::config::Config;
use azedarach::devserver::{DevServerController, PortAllocator};
use azedarach::overlay::{OverlayService, ToastLevel};
use azedarach::session::{MergeResult, SessionManager, SessionState, StartOptions};
use azedarach::tmux::{MockTmuxClient, TmuxClient};
use tempfile::TempDir;

fn git(args: &[&str], cwd: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .status()
        .expect("git must be on PATH to run this test");
    assert!(status.success(), "git {args:?} failed in {cwd:?}");
}

fn write_and_commit(repo: &Path, file: &str, contents: &str, message: &str) {
    std::fs::write(repo.join(file), contents).unwrap();
    git(&["add", "."], repo);
    git(&["commit", "-m", message], repo);
}

fn bare_bead(id: &str, status: BeadStatus) -> Bead {
    Bead {
        id: id.to_string(),
        title: format!("bead {id}"),
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

/// S1 — single session lifecycle.
#[tokio::test]
async fn s1_single_session_lifecycle() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("p");
    std::fs::create_dir_all(&project).unwrap();
    // Pre-create the canonical worktree so `ensure` short-circuits before
    // ever invoking `git`.
    std::fs::create_dir_all(temp.path().join("p-az-1")).unwrap();

    let config = Config::default();
    let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
    let manager = SessionManager::new(project.clone(), config, tmux.clone()).unwrap();

    let record = manager
        .start("az-1", StartOptions { with_work: false, yolo: false }, None)
        .await
        .unwrap();

    assert_eq!(record.tmux_session_name, "az-az-1");
    assert_eq!(record.last_known_state, SessionState::Busy);
    assert!(tmux.has_session("az-az-1").unwrap());
    assert_eq!(record.worktree_path, temp.path().join("p-az-1"));

    manager.stop("az-1").await.unwrap();
    assert!(!tmux.has_session("az-az-1").unwrap());
    assert!(manager.list_active().await.unwrap().is_empty());
    // Worktree survives a stop.
    assert!(temp.path().join("p-az-1").exists());
}

/// S3 — merge conflict: merging the base branch into a worktree with a
/// genuine conflict opens a `merge` window, drops the agent a prompt naming
/// the file, and warns via toast. The session never moves to an error state.
#[tokio::test]
async fn s3_merge_conflict_opens_window_and_warns() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("p");
    std::fs::create_dir_all(&project).unwrap();

    git(&["init", "-b", "main"], &project);
    git(&["config", "user.email", "test@example.com"], &project);
    git(&["config", "user.name", "Test"], &project);
    write_and_commit(&project, "shared.txt", "original\n", "initial commit");

    let config = Config::default();
    let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
    let manager = SessionManager::new(project.clone(), config, tmux.clone()).unwrap();

    manager
        .start("az-3", StartOptions { with_work: false, yolo: false }, None)
        .await
        .unwrap();

    let worktree_path = temp.path().join("p-az-3");
    write_and_commit(&worktree_path, "shared.txt", "changed on the worktree\n", "worktree edit");
    write_and_commit(&project, "shared.txt", "changed on main\n", "main edit");

    let (toast_tx, mut toast_rx) = tokio::sync::mpsc::unbounded_channel();
    let overlay = OverlayService::new(toast_tx);

    let result = manager.merge_from_base("az-3", &overlay).await.unwrap();
    match result {
        MergeResult::Conflict { files } => assert_eq!(files, vec!["shared.txt".to_string()]),
        MergeResult::Merged => panic!("expected a merge conflict"),
    }

    assert!(tmux.has_window("az-az-3", "merge").unwrap());
    let sent = tmux.sent_keys_for("az-az-3:merge");
    assert!(sent
        .iter()
        .any(|k| k.contains("merge conflicts") && k.contains("shared.txt")));

    let toast = toast_rx.try_recv().unwrap();
    assert_eq!(toast.level, ToastLevel::Warning);
    assert!(toast.text.contains("az-3"));
}

/// S2 — dev-server port allocation, same map shared across servers of one
/// bead, disjoint map for a different bead.
#[tokio::test]
async fn s2_dev_server_port_allocation() {
    let mut config = Config::default();
    config.dev_server.servers.insert(
        "web".to_string(),
        azedarach::config::DevServerDefinition {
            command: "bun dev".to_string(),
            cwd: None,
            ports: [("PORT".to_string(), 3000u16)].into_iter().collect(),
        },
    );
    config.dev_server.servers.insert(
        "api".to_string(),
        azedarach::config::DevServerDefinition {
            command: "bun api".to_string(),
            cwd: None,
            ports: [("API_PORT".to_string(), 4000u16), ("PORT".to_string(), 3000u16)]
                .into_iter()
                .collect(),
        },
    );

    let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
    tmux.new_session("az-az-2", &PathBuf::from("/tmp")).unwrap();
    tmux.new_session("az-az-3", &PathBuf::from("/tmp")).unwrap();

    let ports = Arc::new(PortAllocator::new());
    let controller = DevServerController::new(tmux.clone(), &config, ports);

    controller.start("az-2", "web", "az-az-2").await.unwrap();
    let after_web = controller.allocation_for("az-2").await;
    assert_eq!(after_web.get("PORT"), Some(&3000));
    assert_eq!(after_web.get("API_PORT"), Some(&4000));

    controller.start("az-2", "api", "az-az-2").await.unwrap();
    let after_api = controller.allocation_for("az-2").await;
    assert_eq!(after_api, after_web, "second server reuses the same per-bead port map");

    controller.start("az-3", "web", "az-az-3").await.unwrap();
    let bead3 = controller.allocation_for("az-3").await;
    assert_eq!(bead3.get("PORT"), Some(&3001));
    assert_eq!(bead3.get("API_PORT"), Some(&4001));
}

/// S5 — optimistic move: the overlay reflects the target status before the
/// real update returns, and is gone once it has.
#[test]
fn s5_optimistic_move_overlay_then_clear() {
    let beads = vec![bare_bead("az-4", BeadStatus::Open)];

    let mut pending = PendingMutations::new();
    pending.insert("az-4".to_string(), PendingMutation::Move(BeadStatus::InProgress));

    let overlaid = BeadsClient::apply_pending(beads.clone(), &pending);
    assert_eq!(overlaid[0].status, BeadStatus::InProgress);

    // Once the real update commits with the same status, the caller clears
    // the pending map; re-applying an empty overlay shows the tracker's own
    // value.
    let committed = vec![bare_bead("az-4", BeadStatus::InProgress)];
    let cleared = BeadsClient::apply_pending(committed, &PendingMutations::new());
    assert_eq!(cleared[0].status, BeadStatus::InProgress);
}

/// S6 — crash recovery: a Session Record with no live tmux session is
/// detected as crashed, then `recover` re-creates the session and returns
/// it to `busy`.
#[tokio::test]
async fn s6_crash_then_recover() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("p");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::create_dir_all(temp.path().join("p-az-5")).unwrap();

    let config = Config::default();
    let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
    let manager = SessionManager::new(project.clone(), config, tmux.clone()).unwrap();

    manager
        .start("az-5", StartOptions { with_work: false, yolo: false }, None)
        .await
        .unwrap();

    // Simulate the agent process dying: the tmux session disappears without
    // going through `stop`.
    tmux.kill_session("az-az-5").unwrap();

    let crashed = manager.detect_crashes().await.unwrap();
    assert_eq!(crashed, vec!["az-5".to_string()]);

    let recovered = manager.recover("az-5").await.unwrap();
    assert_eq!(recovered.last_known_state, SessionState::Busy);
    assert!(tmux.has_session("az-az-5").unwrap());
}
