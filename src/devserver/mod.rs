//! Dev-Server Controller: per-bead dev server windows, port
//! allocation, and TCP-probe health checking.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::config::{Config, DevServerDefinition};
use crate::tmux::TmuxClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevServerStatus {
    Idle,
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerInstance {
    pub bead_id: String,
    pub server_name: String,
    pub status: DevServerStatus,
    pub port: Option<u16>,
    pub window: String,
    pub command: String,
    pub cwd: Option<String>,
    pub started_at: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct BeadAllocation {
    ports: HashMap<String, u16>,
}

/// Process-wide set of held TCP ports.
#[derive(Default)]
pub struct PortAllocator {
    allocated: std::sync::Mutex<std::collections::HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest `port >= base` not currently held, then reserves it.
    pub fn allocate(&self, base: u16) -> u16 {
        let mut allocated = self.allocated.lock().unwrap();
        let mut candidate = base;
        while allocated.contains(&candidate) {
            candidate += 1;
        }
        allocated.insert(candidate);
        candidate
    }

    pub fn release(&self, port: u16) {
        self.allocated.lock().unwrap().remove(&port);
    }

    pub fn reserve_existing(&self, port: u16) {
        self.allocated.lock().unwrap().insert(port);
    }
}

fn window_name(server_name: &str) -> String {
    format!("dev-{server_name}")
}

pub struct DevServerController {
    tmux: Arc<dyn TmuxClient>,
    servers: HashMap<String, DevServerDefinition>,
    port_pattern: Regex,
    port_detect_timeout: Duration,
    health_check_interval: Duration,
    ports: Arc<PortAllocator>,
    allocations: Mutex<HashMap<String, BeadAllocation>>,
    instances: Mutex<HashMap<(String, String), DevServerInstance>>,
}

impl DevServerController {
    pub fn new(tmux: Arc<dyn TmuxClient>, config: &Config, ports: Arc<PortAllocator>) -> Self {
        let port_pattern = Regex::new(&config.dev_server.port_pattern)
            .unwrap_or_else(|_| Regex::new(r"(?:localhost|127\.0\.0\.1):(\d+)").unwrap());
        Self {
            tmux,
            servers: config.dev_server.servers.clone(),
            port_pattern,
            port_detect_timeout: Duration::from_secs(config.dev_server.port_detect_timeout_secs),
            health_check_interval: Duration::from_secs(config.dev_server.health_check_interval_secs),
            ports,
            allocations: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// The port map currently allocated to `bead_id`, empty if none.
    pub async fn allocation_for(&self, bead_id: &str) -> HashMap<String, u16> {
        self.allocations
            .lock()
            .await
            .get(bead_id)
            .map(|a| a.ports.clone())
            .unwrap_or_default()
    }

    /// Allocate all configured ports for all servers of `bead_id` at once,
    /// first definition wins on env-name collision.
    async fn ensure_allocation(&self, bead_id: &str) -> BeadAllocation {
        let mut allocations = self.allocations.lock().await;
        if let Some(existing) = allocations.get(bead_id) {
            return existing.clone();
        }

        let mut ports = HashMap::new();
        let mut server_names: Vec<&String> = self.servers.keys().collect();
        server_names.sort();
        for name in server_names {
            let def = &self.servers[name];
            for (env_name, base_port) in &def.ports {
                ports
                    .entry(env_name.clone())
                    .or_insert_with(|| self.ports.allocate(*base_port));
            }
        }

        let allocation = BeadAllocation { ports };
        allocations.insert(bead_id.to_string(), allocation.clone());
        allocation
    }

    fn env_prefix(ports: &BeadAllocation) -> String {
        let mut names: Vec<&String> = ports.ports.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| format!("{name}={} ", ports.ports[name]))
            .collect()
    }

    #[instrument(skip(self), fields(bead_id, server_name))]
    pub async fn start(&self, bead_id: &str, server_name: &str, session: &str) -> anyhow::Result<()> {
        let Some(def) = self.servers.get(server_name).cloned() else {
            anyhow::bail!("no dev server named {server_name} configured");
        };

        let allocation = self.ensure_allocation(bead_id).await;
        let env_prefix = Self::env_prefix(&allocation);
        let full_command = format!("{env_prefix}{}", def.command);
        let window = window_name(server_name);
        let cwd = def
            .cwd
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        self.tmux.new_window(session, &window, &cwd, Some(&full_command))?;

        // This server's own primary port, looked up in the bead's allocated
        // map (not its config-declared base, which may belong to another
        // bead's instance once allocation has bumped past collisions).
        let primary_env = {
            let mut names: Vec<&String> = def.ports.keys().collect();
            names.sort();
            names.first().map(|n| (*n).clone())
        };
        let port = primary_env.and_then(|name| allocation.ports.get(&name).copied());

        let instance = DevServerInstance {
            bead_id: bead_id.to_string(),
            server_name: server_name.to_string(),
            status: DevServerStatus::Starting,
            port,
            window,
            command: def.command.clone(),
            cwd: def.cwd.clone(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };

        let mut instances = self.instances.lock().await;
        instances.insert((bead_id.to_string(), server_name.to_string()), instance);
        drop(instances);

        self.persist_metadata(session).await;
        Ok(())
    }

    /// On stop of the last running server of a bead, release all of its
    /// ports.
    #[instrument(skip(self), fields(bead_id, server_name))]
    pub async fn stop(&self, bead_id: &str, server_name: &str, session: &str) -> anyhow::Result<()> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(&(bead_id.to_string(), server_name.to_string())) {
            let _ = self.tmux.kill_window(&format!("{session}:{}", instance.window));
            instance.status = DevServerStatus::Stopped;
        }

        let any_running = instances
            .iter()
            .any(|((b, _), i)| b == bead_id && i.status == DevServerStatus::Running);
        drop(instances);

        if !any_running {
            let mut allocations = self.allocations.lock().await;
            if let Some(allocation) = allocations.remove(bead_id) {
                for port in allocation.ports.values() {
                    self.ports.release(*port);
                }
            }
        }

        self.persist_metadata(session).await;
        Ok(())
    }

    /// TCP-probe every known server; reconcile status with window presence.
    #[instrument(skip(self))]
    pub async fn health_check_tick(&self, session: &str) {
        let keys: Vec<(String, String)> = self.instances.lock().await.keys().cloned().collect();
        for (bead_id, server_name) in keys {
            let window_exists = {
                let instances = self.instances.lock().await;
                let Some(instance) = instances.get(&(bead_id.clone(), server_name.clone())) else {
                    continue;
                };
                self.tmux
                    .has_window(session, &instance.window)
                    .unwrap_or(false)
            };

            if !window_exists {
                self.set_status(&bead_id, &server_name, DevServerStatus::Idle).await;
                continue;
            }

            let port = {
                let instances = self.instances.lock().await;
                instances
                    .get(&(bead_id.clone(), server_name.clone()))
                    .and_then(|i| i.port)
            };

            if let Some(port) = port {
                let alive = probe_port(port).await;
                let new_status = if alive {
                    DevServerStatus::Running
                } else {
                    DevServerStatus::Stopped
                };
                self.set_status(&bead_id, &server_name, new_status).await;
            }
        }
    }

    async fn set_status(&self, bead_id: &str, server_name: &str, status: DevServerStatus) {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(&(bead_id.to_string(), server_name.to_string())) {
            instance.status = status;
        }
    }

    /// Poll the window's pane output for a `localhost:<port>` match, up to
    /// the configured timeout.
    #[instrument(skip(self), fields(bead_id, server_name))]
    pub async fn detect_port(&self, bead_id: &str, server_name: &str, session: &str) -> Option<u16> {
        let window = window_name(server_name);
        let target = format!("{session}:{window}");
        let deadline = tokio::time::Instant::now() + self.port_detect_timeout;

        while tokio::time::Instant::now() < deadline {
            if let Ok(pane) = self.tmux.capture_pane(&target, 200) {
                if let Some(captures) = self.port_pattern.captures(&pane) {
                    if let Some(port_match) = captures.get(1) {
                        if let Ok(port) = port_match.as_str().parse::<u16>() {
                            let mut instances = self.instances.lock().await;
                            if let Some(instance) =
                                instances.get_mut(&(bead_id.to_string(), server_name.to_string()))
                            {
                                instance.port = Some(port);
                            }
                            return Some(port);
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        None
    }

    /// Writes the full state into the `@az-devserver-meta` tmux user-option
    /// so a crashed control plane can recover it.
    async fn persist_metadata(&self, session: &str) {
        let instances = self.instances.lock().await;
        let relevant: Vec<&DevServerInstance> = instances.values().collect();
        match serde_json::to_string(&relevant) {
            Ok(json) => {
                if let Err(e) = self.tmux.set_user_option(session, "@az-devserver-meta", &json) {
                    warn!(error = %e, "failed to persist dev-server metadata (best-effort)");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize dev-server metadata"),
        }
    }
}

async fn probe_port(port: u16) -> bool {
    let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port);

    let (v4_ok, v6_ok) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(v4)),
        tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(v6)),
    );

    matches!(v4_ok, Ok(Ok(_))) || matches!(v6_ok, Ok(Ok(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_gives_next_free_port_on_collision() {
        let allocator = PortAllocator::new();
        assert_eq!(allocator.allocate(3000), 3000);
        assert_eq!(allocator.allocate(3000), 3001);
    }

    #[test]
    fn allocate_release_allocate_returns_same_port() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate(4000);
        allocator.release(port);
        assert_eq!(allocator.allocate(4000), port);
    }
}
