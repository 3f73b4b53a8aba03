//! Terminal multiplexer adapter.
//!
//! The only component allowed to speak to the `tmux` binary. Everything
//! else in this crate goes through the [`TmuxClient`] trait so that the
//! rest of the control plane can be tested without a real tmux server.

mod naming;

pub use naming::{legacy_session_name, session_name_for_bead, sanitize_session_name};

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Mutex;

use thiserror::Error;

/// Errors surfaced by the Terminal Multiplexer Adapter.
#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("tmux is not installed or not on PATH")]
    TmuxNotAvailable,

    #[error("tmux exited with code {code}: {stderr}")]
    TmuxExitNonZero { code: i32, stderr: String },

    #[error("{0} not found")]
    NotFound(String),
}

/// A live tmux session as reported by `list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxSessionInfo {
    pub name: String,
    pub created: Option<String>,
    pub attached: bool,
}

/// Options for [`TmuxClient::display_popup`].
#[derive(Debug, Clone)]
pub struct PopupOptions<'a> {
    pub command: &'a str,
    pub width_pct: u8,
    pub height_pct: u8,
    pub title: &'a str,
    pub cwd: &'a Path,
}

/// Distinguished token for [`TmuxClient::send_keys`]: send the literal text,
/// then a genuine `Enter` key event (never the three-character string
/// `"Enter"`, which tmux would otherwise interpret as a key name only when
/// passed as its own argument — see `SystemTmuxClient::send_keys`).
pub const ENTER: &str = "\n";

/// Trait abstracting tmux operations so Session Manager, Session-State
/// Monitor and Dev-Server Controller can be tested without a real binary.
pub trait TmuxClient: Send + Sync {
    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, TmuxError>;
    fn has_session(&self, name: &str) -> Result<bool, TmuxError>;
    fn new_session(&self, name: &str, cwd: &Path) -> Result<(), TmuxError>;
    fn kill_session(&self, name: &str) -> Result<(), TmuxError>;
    fn attach(&self, name: &str) -> Result<(), TmuxError>;

    fn list_windows(&self, session: &str) -> Result<Vec<String>, TmuxError>;
    fn has_window(&self, session: &str, name: &str) -> Result<bool, TmuxError>;
    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> Result<(), TmuxError>;
    fn kill_window(&self, target: &str) -> Result<(), TmuxError>;
    fn select_window(&self, target: &str) -> Result<(), TmuxError>;

    /// Send `literal` verbatim (never interpreted as tmux key syntax), then
    /// optionally a real `Enter` key event.
    fn send_keys(&self, target: &str, literal: &str, enter: bool) -> Result<(), TmuxError>;
    fn capture_pane(&self, target: &str, lines: u32) -> Result<String, TmuxError>;

    fn set_user_option(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError>;
    fn get_user_option(&self, session: &str, key: &str) -> Result<Option<String>, TmuxError>;

    fn display_popup(&self, opts: &PopupOptions<'_>) -> Result<(), TmuxError>;
}

/// Default socket name for azedarach-managed tmux sessions. Using a
/// dedicated socket keeps these sessions isolated from a developer's own
/// interactively-attached tmux server.
pub const AZEDARACH_SOCKET: &str = "azedarach";

/// Real implementation over `std::process::Command`. Deliberately
/// synchronous (tmux invocations are short-lived); callers from async
/// contexts should wrap calls in `tokio::task::spawn_blocking`.
pub struct SystemTmuxClient {
    socket_name: Option<String>,
}

impl SystemTmuxClient {
    pub fn new() -> Self {
        Self { socket_name: None }
    }

    /// Use a dedicated socket so azedarach sessions never collide with a
    /// developer's own default tmux server.
    pub fn with_dedicated_socket() -> Self {
        Self {
            socket_name: Some(AZEDARACH_SOCKET.to_string()),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, TmuxError> {
        let mut cmd = Command::new("tmux");
        if let Some(socket) = &self.socket_name {
            cmd.arg("-L").arg(socket);
        }
        cmd.args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TmuxError::TmuxNotAvailable
            } else {
                TmuxError::TmuxExitNonZero {
                    code: -1,
                    stderr: e.to_string(),
                }
            }
        })
    }

    fn run_ok(&self, args: &[&str]) -> Result<Output, TmuxError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(TmuxError::TmuxExitNonZero {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Default for SystemTmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks tmux is installed and returns its version string, for the CLI
/// startup gate (`--version >= minimum`).
pub fn check_tmux_version(client: &SystemTmuxClient) -> Result<String, TmuxError> {
    let output = client.run(&["-V"])?;
    if !output.status.success() {
        return Err(TmuxError::TmuxNotAvailable);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl TmuxClient for SystemTmuxClient {
    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, TmuxError> {
        let output = self.run(&[
            "list-sessions",
            "-F",
            "#{session_name}\t#{session_created}\t#{session_attached}",
        ])?;
        if !output.status.success() {
            // No sessions at all is reported as a non-zero exit by tmux.
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let name = parts.next()?.to_string();
                let created = parts.next().map(|s| s.to_string());
                let attached = parts.next().map(|s| s == "1").unwrap_or(false);
                Some(TmuxSessionInfo {
                    name,
                    created,
                    attached,
                })
            })
            .collect())
    }

    fn has_session(&self, name: &str) -> Result<bool, TmuxError> {
        match self.run(&["has-session", "-t", &format!("={}", name)]) {
            Ok(out) => Ok(out.status.success()),
            Err(TmuxError::TmuxNotAvailable) => Err(TmuxError::TmuxNotAvailable),
            Err(_) => Ok(false),
        }
    }

    fn new_session(&self, name: &str, cwd: &Path) -> Result<(), TmuxError> {
        self.run_ok(&[
            "new-session",
            "-d",
            "-s",
            name,
            "-c",
            &cwd.to_string_lossy(),
        ])?;
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<(), TmuxError> {
        if !self.has_session(name)? {
            return Err(TmuxError::NotFound(format!("session '{name}'")));
        }
        self.run_ok(&["kill-session", "-t", name])?;
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<(), TmuxError> {
        self.run_ok(&["attach-session", "-t", name])?;
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<String>, TmuxError> {
        let output = self.run(&["list-windows", "-t", session, "-F", "#{window_name}"])?;
        if !output.status.success() {
            return Err(TmuxError::NotFound(format!("session '{session}'")));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.to_string())
            .collect())
    }

    fn has_window(&self, session: &str, name: &str) -> Result<bool, TmuxError> {
        Ok(self.list_windows(session)?.iter().any(|w| w == name))
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> Result<(), TmuxError> {
        let mut args = vec![
            "new-window".to_string(),
            "-t".to_string(),
            session.to_string(),
            "-n".to_string(),
            name.to_string(),
            "-c".to_string(),
            cwd.to_string_lossy().to_string(),
        ];
        if let Some(cmd) = command {
            args.push(cmd.to_string());
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_ok(&args_ref)?;
        Ok(())
    }

    fn kill_window(&self, target: &str) -> Result<(), TmuxError> {
        self.run_ok(&["kill-window", "-t", target])?;
        Ok(())
    }

    fn select_window(&self, target: &str) -> Result<(), TmuxError> {
        self.run_ok(&["select-window", "-t", target])?;
        Ok(())
    }

    fn send_keys(&self, target: &str, literal: &str, enter: bool) -> Result<(), TmuxError> {
        // `-l` forces a literal send: tmux never interprets it as key syntax.
        self.run_ok(&["send-keys", "-t", target, "-l", literal])?;
        if enter {
            self.run_ok(&["send-keys", "-t", target, "Enter"])?;
        }
        Ok(())
    }

    fn capture_pane(&self, target: &str, lines: u32) -> Result<String, TmuxError> {
        let start = format!("-{lines}");
        let output = self.run_ok(&["capture-pane", "-p", "-e", "-t", target, "-S", &start])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn set_user_option(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        self.run_ok(&["set-option", "-t", session, key, value])?;
        Ok(())
    }

    fn get_user_option(&self, session: &str, key: &str) -> Result<Option<String>, TmuxError> {
        let output = self.run(&["show-options", "-t", session, "-v", key]);
        match output {
            Ok(out) if out.status.success() => {
                let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            Ok(_) => Ok(None),
            Err(TmuxError::TmuxNotAvailable) => Err(TmuxError::TmuxNotAvailable),
            Err(_) => Ok(None),
        }
    }

    fn display_popup(&self, opts: &PopupOptions<'_>) -> Result<(), TmuxError> {
        self.run_ok(&[
            "display-popup",
            "-E",
            "-w",
            &format!("{}%", opts.width_pct),
            "-h",
            &format!("{}%", opts.height_pct),
            "-T",
            opts.title,
            "-d",
            &opts.cwd.to_string_lossy(),
            opts.command,
        ])?;
        Ok(())
    }
}

/// Leading session name of a tmux target (`session`, `session:window`, or
/// `session.pane`).
fn session_part(target: &str) -> &str {
    let end = target
        .find(':')
        .into_iter()
        .chain(target.find('.'))
        .min()
        .unwrap_or(target.len());
    &target[..end]
}

/// In-memory fake used by tests. Records windows, user-options and sent
/// keys so tests can assert on them without a real tmux server.
#[derive(Default)]
pub struct MockTmuxClient {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, MockSession>,
}

#[derive(Default, Clone)]
struct MockSession {
    windows: Vec<String>,
    options: HashMap<String, String>,
    sent_keys: Vec<String>,
    panes: HashMap<String, String>,
}

impl MockTmuxClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session as if it already existed (for crash-recovery tests).
    pub fn seed_session(&self, name: &str) {
        let mut state = self.inner.lock().unwrap();
        state.sessions.entry(name.to_string()).or_default();
    }

    pub fn sent_keys_for(&self, target: &str) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        let session = session_part(target);
        state
            .sessions
            .get(session)
            .map(|s| s.sent_keys.clone())
            .unwrap_or_default()
    }

    pub fn set_pane_content(&self, target: &str, content: &str) {
        let mut state = self.inner.lock().unwrap();
        let session = session_part(target).to_string();
        state
            .sessions
            .entry(session)
            .or_default()
            .panes
            .insert(target.to_string(), content.to_string());
    }
}

impl TmuxClient for MockTmuxClient {
    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, TmuxError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .sessions
            .keys()
            .map(|name| TmuxSessionInfo {
                name: name.clone(),
                created: None,
                attached: false,
            })
            .collect())
    }

    fn has_session(&self, name: &str) -> Result<bool, TmuxError> {
        Ok(self.inner.lock().unwrap().sessions.contains_key(name))
    }

    fn new_session(&self, name: &str, _cwd: &Path) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        if state.sessions.contains_key(name) {
            return Err(TmuxError::TmuxExitNonZero {
                code: 1,
                stderr: format!("duplicate session: {name}"),
            });
        }
        state.sessions.insert(name.to_string(), MockSession::default());
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        if state.sessions.remove(name).is_none() {
            return Err(TmuxError::NotFound(format!("session '{name}'")));
        }
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<(), TmuxError> {
        let state = self.inner.lock().unwrap();
        if !state.sessions.contains_key(name) {
            return Err(TmuxError::NotFound(format!("session '{name}'")));
        }
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<String>, TmuxError> {
        let state = self.inner.lock().unwrap();
        state
            .sessions
            .get(session)
            .map(|s| s.windows.clone())
            .ok_or_else(|| TmuxError::NotFound(format!("session '{session}'")))
    }

    fn has_window(&self, session: &str, name: &str) -> Result<bool, TmuxError> {
        Ok(self.list_windows(session)?.iter().any(|w| w == name))
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        _cwd: &Path,
        _command: Option<&str>,
    ) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::NotFound(format!("session '{session}'")))?;
        s.windows.push(name.to_string());
        Ok(())
    }

    fn kill_window(&self, target: &str) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        let (session, window) = target
            .split_once(':')
            .ok_or_else(|| TmuxError::NotFound(target.to_string()))?;
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::NotFound(format!("session '{session}'")))?;
        s.windows.retain(|w| w != window);
        Ok(())
    }

    fn select_window(&self, _target: &str) -> Result<(), TmuxError> {
        Ok(())
    }

    fn send_keys(&self, target: &str, literal: &str, enter: bool) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        let session = session_part(target);
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::NotFound(format!("session '{session}'")))?;
        s.sent_keys.push(literal.to_string());
        if enter {
            s.sent_keys.push(ENTER.to_string());
        }
        Ok(())
    }

    fn capture_pane(&self, target: &str, _lines: u32) -> Result<String, TmuxError> {
        let state = self.inner.lock().unwrap();
        let session = session_part(target);
        state
            .sessions
            .get(session)
            .and_then(|s| s.panes.get(target).cloned())
            .ok_or_else(|| TmuxError::NotFound(target.to_string()))
    }

    fn set_user_option(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        let mut state = self.inner.lock().unwrap();
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::NotFound(format!("session '{session}'")))?;
        s.options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_user_option(&self, session: &str, key: &str) -> Result<Option<String>, TmuxError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .sessions
            .get(session)
            .and_then(|s| s.options.get(key).cloned()))
    }

    fn display_popup(&self, _opts: &PopupOptions<'_>) -> Result<(), TmuxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn new_session_then_has_session() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        assert!(client.has_session("az-1").unwrap());
    }

    #[test]
    fn duplicate_session_errors() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        assert!(client.new_session("az-1", &PathBuf::from("/tmp")).is_err());
    }

    #[test]
    fn kill_unknown_session_is_not_found() {
        let client = MockTmuxClient::new();
        assert!(matches!(
            client.kill_session("az-missing"),
            Err(TmuxError::NotFound(_))
        ));
    }

    #[test]
    fn user_option_round_trips() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        assert_eq!(client.get_user_option("az-1", "@az_status").unwrap(), None);
        client
            .set_user_option("az-1", "@az_status", "busy")
            .unwrap();
        assert_eq!(
            client.get_user_option("az-1", "@az_status").unwrap(),
            Some("busy".to_string())
        );
    }

    #[test]
    fn window_lifecycle() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        client
            .new_window("az-1", "dev-web", &PathBuf::from("/tmp"), None)
            .unwrap();
        assert!(client.has_window("az-1", "dev-web").unwrap());
        client.kill_window("az-1:dev-web").unwrap();
        assert!(!client.has_window("az-1", "dev-web").unwrap());
    }

    #[test]
    fn send_keys_records_literal_and_enter_separately() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        client.send_keys("az-1", "echo hi", true).unwrap();
        let sent = client.sent_keys_for("az-1");
        assert_eq!(sent, vec!["echo hi".to_string(), ENTER.to_string()]);
    }

    #[test]
    fn send_keys_targets_a_window_qualified_session() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        client
            .new_window("az-1", "merge", &PathBuf::from("/tmp"), None)
            .unwrap();
        client.send_keys("az-1:merge", "resolve this", true).unwrap();
        assert_eq!(
            client.sent_keys_for("az-1:merge"),
            vec!["resolve this".to_string(), ENTER.to_string()]
        );
    }

    #[test]
    fn capture_pane_targets_a_window_qualified_session() {
        let client = MockTmuxClient::new();
        client.new_session("az-1", &PathBuf::from("/tmp")).unwrap();
        client.set_pane_content("az-1:dev-web", "listening on localhost:3042");
        let captured = client.capture_pane("az-1:dev-web", 100).unwrap();
        assert!(captured.contains("3042"));
    }
}
