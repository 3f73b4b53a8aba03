//! Diagnostics & Network: supervised-task registry
//! and the online/offline gate for git fetch/push/PR operations.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct TaskDiagnostic {
    pub name: String,
    pub restarts_last_60s: u32,
    pub alive: bool,
}

/// Tracks supervised-task identities and restart counts so the Supervisor
/// can surface a diagnostic once a child exceeds its restart budget
/// under the Supervisor.
#[derive(Default)]
pub struct DiagnosticsRegistry {
    tasks: Mutex<HashMap<String, TaskDiagnostic>>,
}

impl DiagnosticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.tasks.lock().await.insert(
            name.to_string(),
            TaskDiagnostic {
                name: name.to_string(),
                restarts_last_60s: 0,
                alive: true,
            },
        );
    }

    pub async fn record_restart(&self, name: &str) -> u32 {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks.entry(name.to_string()).or_insert(TaskDiagnostic {
            name: name.to_string(),
            restarts_last_60s: 0,
            alive: true,
        });
        entry.restarts_last_60s += 1;
        entry.restarts_last_60s
    }

    pub async fn mark_dead(&self, name: &str) {
        if let Some(entry) = self.tasks.lock().await.get_mut(name) {
            entry.alive = false;
        }
    }

    pub async fn snapshot(&self) -> Vec<TaskDiagnostic> {
        self.tasks.lock().await.values().cloned().collect()
    }
}

/// Online/offline probe gating git fetch/push and PR operations
/// (`NetworkUnavailable`).
pub struct NetworkMonitor {
    check_host: String,
    online: AtomicBool,
}

impl NetworkMonitor {
    pub fn new(check_host: String) -> Self {
        Self {
            check_host,
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    #[instrument(skip(self))]
    pub async fn check(&self) -> bool {
        let host = self.check_host.clone();
        let result = tokio::task::spawn_blocking(move || host.to_socket_addrs())
            .await
            .ok()
            .and_then(|r| r.ok())
            .and_then(|mut addrs| addrs.next());

        let online = match result {
            Some(addr) => tokio::time::timeout(Duration::from_secs(3), TcpStream::connect(addr))
                .await
                .is_ok_and(|r| r.is_ok()),
            None => false,
        };

        if !online {
            warn!(host = %self.check_host, "network check failed, marking offline");
        }
        self.online.store(online, Ordering::Relaxed);
        online
    }

    /// Runs [`Self::check`] on a timer until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.check().await;
        }
    }
}
