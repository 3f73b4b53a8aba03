//! Session-State Monitor: polls the `@az_status` tmux
//! user-option, the authoritative source of session state written by
//! external agent hooks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{error, instrument, warn};

use super::record::SessionState;
use crate::tmux::TmuxClient;

#[derive(Debug, Clone)]
pub struct StateChanged {
    pub bead_id: String,
    pub new_state: SessionState,
}

fn parse_status(raw: &str) -> SessionState {
    match raw {
        "idle" => SessionState::Idle,
        "initializing" => SessionState::Initializing,
        "busy" => SessionState::Busy,
        "waiting" => SessionState::Waiting,
        "paused" => SessionState::Paused,
        "done" => SessionState::Done,
        "error" => SessionState::Error,
        "crashed" => SessionState::Crashed,
        "warning" => SessionState::Warning,
        _ => SessionState::Unknown,
    }
}

/// Tracks adapter failures within a trailing 60 s window; three failures in
/// that window marks affected sessions `unknown` instead of flapping state
/// (crash tracking).
struct FailureTracker {
    failures: VecDeque<Instant>,
}

impl FailureTracker {
    fn new() -> Self {
        Self {
            failures: VecDeque::new(),
        }
    }

    fn record_failure(&mut self) -> bool {
        let now = Instant::now();
        self.failures.push_back(now);
        while let Some(front) = self.failures.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.len() >= 3
    }

    fn clear(&mut self) {
        self.failures.clear();
    }
}

pub struct SessionStateMonitor {
    tmux: Arc<dyn TmuxClient>,
    previous: Mutex<HashMap<String, SessionState>>,
    failures: Mutex<FailureTracker>,
    poll_guard: Mutex<()>,
    pattern_fallback: bool,
}

impl SessionStateMonitor {
    pub fn new(tmux: Arc<dyn TmuxClient>, pattern_fallback: bool) -> Self {
        Self {
            tmux,
            previous: Mutex::new(HashMap::new()),
            failures: Mutex::new(FailureTracker::new()),
            poll_guard: Mutex::new(()),
            pattern_fallback,
        }
    }

    /// One poll tick. A second call while the first is still in flight is a
    /// no-op: one in-flight poll at a time.
    #[instrument(skip(self, sink))]
    pub async fn tick(&self, sink: &mpsc::UnboundedSender<StateChanged>) {
        let Ok(_guard) = self.poll_guard.try_lock() else {
            return;
        };

        let sessions = match self.tmux.list_sessions() {
            Ok(sessions) => {
                self.failures.lock().await.clear();
                sessions
            }
            Err(e) => {
                let marked_unknown = self.failures.lock().await.record_failure();
                if marked_unknown {
                    error!(error = %e, "tmux adapter failed 3 times in 60s, marking known sessions unknown");
                    let mut previous = self.previous.lock().await;
                    for (bead_id, state) in previous.iter_mut() {
                        *state = SessionState::Unknown;
                        let _ = sink.send(StateChanged {
                            bead_id: bead_id.clone(),
                            new_state: SessionState::Unknown,
                        });
                    }
                } else {
                    warn!(error = %e, "tmux adapter poll failed");
                }
                return;
            }
        };

        let mut seen = std::collections::HashSet::new();
        for session in &sessions {
            let Some(bead_id) = crate::tmux::naming::bead_id_for_session(&session.name) else {
                continue;
            };
            seen.insert(bead_id.clone());

            let state = match self.tmux.get_user_option(&session.name, "@az_status") {
                Ok(Some(raw)) => parse_status(&raw),
                Ok(None) => SessionState::Busy,
                Err(_) if self.pattern_fallback => SessionState::Unknown,
                Err(_) => SessionState::Busy,
            };

            let mut previous = self.previous.lock().await;
            let changed = previous.get(&bead_id) != Some(&state);
            previous.insert(bead_id.clone(), state);
            drop(previous);

            if changed {
                let _ = sink.send(StateChanged {
                    bead_id,
                    new_state: state,
                });
            }
        }

        let mut previous = self.previous.lock().await;
        let vanished: Vec<String> = previous
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for bead_id in vanished {
            previous.remove(&bead_id);
            let _ = sink.send(StateChanged {
                bead_id,
                new_state: SessionState::Idle,
            });
        }
    }

    /// Runs [`Self::tick`] on `period` until the sink is closed.
    pub async fn run(&self, sink: mpsc::UnboundedSender<StateChanged>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if sink.is_closed() {
                return;
            }
            self.tick(&sink).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::MockTmuxClient;

    #[tokio::test]
    async fn emits_state_changed_from_user_option() {
        let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
        tmux.new_session("az-1", std::path::Path::new("/tmp")).unwrap();
        tmux.set_user_option("az-1", "@az_status", "waiting").unwrap();

        let monitor = SessionStateMonitor::new(tmux, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.tick(&tx).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.bead_id, "1");
        assert_eq!(event.new_state, SessionState::Waiting);
    }

    #[tokio::test]
    async fn defaults_to_busy_when_option_absent() {
        let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
        tmux.new_session("az-2", std::path::Path::new("/tmp")).unwrap();

        let monitor = SessionStateMonitor::new(tmux, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.tick(&tx).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.new_state, SessionState::Busy);
    }

    #[tokio::test]
    async fn vanished_session_emits_idle() {
        let tmux: Arc<dyn TmuxClient> = Arc::new(MockTmuxClient::new());
        tmux.new_session("az-3", std::path::Path::new("/tmp")).unwrap();

        let monitor = SessionStateMonitor::new(tmux.clone(), false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.tick(&tx).await;
        rx.try_recv().unwrap();

        tmux.kill_session("az-3").unwrap();
        monitor.tick(&tx).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.new_state, SessionState::Idle);
    }
}
