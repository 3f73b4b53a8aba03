//! Supervisor: wires components, restarts children
//! one-for-one, exposes an application context.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::beads::BeadsClient;
use crate::board::BoardProjection;
use crate::config::{Config, SessionRecoveryMode};
use crate::devserver::{DevServerController, PortAllocator};
use crate::diagnostics::{DiagnosticsRegistry, NetworkMonitor};
use crate::overlay::{OverlayService, Toast};
use crate::project::{ProjectEvent, ProjectService};
use crate::session::{SessionManager, SessionStateMonitor, StateChanged};
use crate::tmux::{SystemTmuxClient, TmuxClient};

const MAX_RESTARTS_PER_WINDOW: u32 = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Application context: the typed operations a CLI front-end or any other
/// caller uses once the Supervisor has started every child.
pub struct Context {
    pub config: Config,
    pub project_path: PathBuf,
    pub tmux: Arc<dyn TmuxClient>,
    pub beads: Arc<BeadsClient>,
    pub sessions: Arc<SessionManager>,
    pub board: Arc<BoardProjection>,
    pub projects: Arc<ProjectService>,
    pub overlay: Arc<OverlayService>,
    pub devserver: Arc<DevServerController>,
    pub diagnostics: Arc<DiagnosticsRegistry>,
    pub network: Arc<NetworkMonitor>,
    pub state_changes: mpsc::UnboundedReceiver<StateChanged>,
    pub toasts: mpsc::UnboundedReceiver<Toast>,
    pub project_events: mpsc::UnboundedReceiver<ProjectEvent>,
}

pub struct Supervisor;

impl Supervisor {
    /// Starts every child asynchronously, gated on construction succeeding;
    /// hands back a [`Context`] exposing typed operations.
    #[instrument(skip(config))]
    pub async fn start(project_path: PathBuf, config: Config) -> Result<Context> {
        let system_tmux = SystemTmuxClient::new();
        crate::tmux::check_tmux_version(&system_tmux)?;
        let tmux: Arc<dyn TmuxClient> = Arc::new(system_tmux);

        let beads = Arc::new(BeadsClient::new(project_path.clone()));
        let sessions = Arc::new(SessionManager::new(
            project_path.clone(),
            config.clone(),
            tmux.clone(),
        )?);

        let board = Arc::new(BoardProjection::new(
            project_path.clone(),
            config.clone(),
            BeadsClient::new(project_path.clone()),
            sessions.clone(),
        ));

        let (project_tx, project_rx) = mpsc::unbounded_channel();
        let projects = Arc::new(ProjectService::new(
            project_path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| project_path.clone()),
            project_path.clone(),
            project_tx,
        ));

        let (toast_tx, toast_rx) = mpsc::unbounded_channel();
        let overlay = Arc::new(OverlayService::new(toast_tx));

        let ports = Arc::new(PortAllocator::new());
        let devserver = Arc::new(DevServerController::new(tmux.clone(), &config, ports));

        let diagnostics = Arc::new(DiagnosticsRegistry::new());
        let network = Arc::new(NetworkMonitor::new(config.network.check_host.clone()));

        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(SessionStateMonitor::new(
            tmux.clone(),
            config.session_state_monitor.pattern_fallback,
        ));
        diagnostics.register("session-state-monitor").await;
        Self::supervise(
            diagnostics.clone(),
            "session-state-monitor",
            move || {
                let monitor = monitor.clone();
                let state_tx = state_tx.clone();
                let period = Duration::from_millis(config.session_state_monitor.poll_interval_ms);
                Box::pin(async move { monitor.run(state_tx, period).await })
            },
        );

        if config.network.auto_detect {
            diagnostics.register("network-monitor").await;
            let network_for_loop = network.clone();
            let interval = Duration::from_secs(config.network.check_interval_seconds);
            tokio::spawn(async move { network_for_loop.run(interval).await });
        }

        if config.session_recovery.mode == SessionRecoveryMode::Auto {
            diagnostics.register("auto-recovery").await;
            let sessions_for_loop = sessions.clone();
            let overlay_for_loop = overlay.clone();
            let poll = Duration::from_millis(config.session_state_monitor.poll_interval_ms);
            let recovery_delay = Duration::from_millis(config.session_recovery.auto_recovery_delay_ms);
            Self::supervise(diagnostics.clone(), "auto-recovery", move || {
                let sessions = sessions_for_loop.clone();
                let overlay = overlay_for_loop.clone();
                Box::pin(Self::auto_recovery_loop(sessions, overlay, poll, recovery_delay))
            });
        }

        info!("all supervised children started");

        Ok(Context {
            config,
            project_path,
            tmux,
            beads,
            sessions,
            board,
            projects,
            overlay,
            devserver,
            diagnostics,
            network,
            state_changes: state_rx,
            toasts: toast_rx,
            project_events: project_rx,
        })
    }

    /// Polls for crashed sessions and, in `auto` recovery mode, schedules a
    /// delayed [`SessionManager::recover`] for each one rather than waiting
    /// on an operator to run it by hand.
    async fn auto_recovery_loop(
        sessions: Arc<SessionManager>,
        overlay: Arc<OverlayService>,
        poll_interval: Duration,
        recovery_delay: Duration,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            let crashed = match sessions.detect_crashes().await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "failed to poll for crashed sessions");
                    continue;
                }
            };

            for bead_id in crashed {
                overlay.warning(format!(
                    "bead {bead_id} crashed, recovering in {}s",
                    recovery_delay.as_secs()
                ));
                let sessions = sessions.clone();
                let overlay = overlay.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(recovery_delay).await;
                    match sessions.recover(&bead_id).await {
                        Ok(_) => overlay.success(format!("bead {bead_id} recovered")),
                        Err(e) => overlay.error(format!("failed to recover {bead_id}: {e}")),
                    }
                });
            }
        }
    }

    /// One-for-one restart: up to [`MAX_RESTARTS_PER_WINDOW`] restarts in
    /// [`RESTART_WINDOW`]; beyond that, surface a diagnostic and leave the
    /// child stopped while the rest of the tree keeps running.
    fn supervise<F>(diagnostics: Arc<DiagnosticsRegistry>, name: &'static str, mut make_future: F)
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + 'static,
    {
        tokio::spawn(async move {
            let mut window_start = tokio::time::Instant::now();
            let mut restarts_in_window = 0u32;

            loop {
                make_future().await;

                if window_start.elapsed() > RESTART_WINDOW {
                    window_start = tokio::time::Instant::now();
                    restarts_in_window = 0;
                }
                restarts_in_window += 1;
                diagnostics.record_restart(name).await;

                if restarts_in_window > MAX_RESTARTS_PER_WINDOW {
                    error!(child = name, "exceeded restart budget, leaving stopped");
                    diagnostics.mark_dead(name).await;
                    return;
                }

                tracing::warn!(child = name, restarts_in_window, "restarting supervised child");
            }
        });
    }
}
