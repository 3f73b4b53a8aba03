//! Persisted configuration: `.azedarach/config.json`.
//!
//! Sources layer in order: compiled-in defaults → project file → user
//! config → environment (`AZEDARACH__` prefix) → explicit `--config` path.
//! Every struct carries a `#[serde(default = "fn")]` per field so a
//! partial `config.json` is valid.

use std::path::PathBuf;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Current config schema version. Bump and add a `migrate_vN` function
/// whenever a field moves or is renamed ("v1 → v2 moved
/// `pr.baseBranch` to `git.baseBranch`").
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(rename = "$schema", default = "default_schema_version")]
    pub schema: u32,

    /// Which external coding-agent CLI to launch.
    #[serde(default)]
    pub cli_tool: CliTool,

    #[serde(default)]
    pub worktree: WorktreeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub pr: PrConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub dev_server: DevServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub beads: BeadsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    #[serde(default)]
    pub session_recovery: SessionRecoveryConfig,
    #[serde(default)]
    pub session_state_monitor: SessionStateMonitorConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub default_project: Option<String>,
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CliTool {
    #[default]
    Claude,
    Opencode,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorktreeConfig {
    #[serde(default)]
    pub init_commands: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(default = "default_true")]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_copy_paths")]
    pub copy_paths: Vec<String>,
}

fn default_copy_paths() -> Vec<String> {
    vec![
        ".direnv".to_string(),
        ".env.local".to_string(),
        "node_modules".to_string(),
    ]
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            init_commands: Vec::new(),
            env: std::collections::HashMap::new(),
            continue_on_failure: true,
            parallel: false,
            copy_paths: default_copy_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    #[serde(default = "default_session_command")]
    pub command: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_tmux_prefix")]
    pub tmux_prefix: String,
    #[serde(default)]
    pub background_tasks: Vec<String>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
}

fn default_session_command() -> String {
    "claude".to_string()
}
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}
fn default_tmux_prefix() -> String {
    "az".to_string()
}
fn default_max_sessions() -> usize {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: default_session_command(),
            shell: default_shell(),
            tmux_prefix: default_tmux_prefix(),
            background_tasks: Vec::new(),
            max_sessions: default_max_sessions(),
            dangerously_skip_permissions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    #[default]
    Local,
    Origin,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GitConfig {
    #[serde(default)]
    pub push_branch_on_create: bool,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_true")]
    pub fetch_enabled: bool,
    #[serde(default = "default_true")]
    pub show_line_changes: bool,
    #[serde(default)]
    pub workflow_mode: WorkflowMode,
}

fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch_prefix() -> String {
    "az-".to_string()
}
fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            push_branch_on_create: false,
            remote: default_remote(),
            branch_prefix: default_branch_prefix(),
            base_branch: default_base_branch(),
            push_enabled: true,
            fetch_enabled: true,
            show_line_changes: true,
            workflow_mode: WorkflowMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_draft: bool,
    #[serde(default)]
    pub auto_merge: bool,
}

impl Default for PrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_draft: false,
            auto_merge: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeConfig {
    #[serde(default)]
    pub validate_commands: Vec<String>,
    #[serde(default)]
    pub fix_command: Option<String>,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
}

fn default_max_fix_attempts() -> u32 {
    3
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            validate_commands: Vec::new(),
            fix_command: None,
            max_fix_attempts: default_max_fix_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DevServerDefinition {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    /// ENV_NAME -> base port
    #[serde(default)]
    pub ports: std::collections::HashMap<String, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DevServerConfig {
    #[serde(default = "default_port_pattern")]
    pub port_pattern: String,
    #[serde(default)]
    pub servers: std::collections::HashMap<String, DevServerDefinition>,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_port_detect_timeout_secs")]
    pub port_detect_timeout_secs: u64,
}

fn default_port_pattern() -> String {
    r"(?:localhost|127\.0\.0\.1):(\d+)".to_string()
}
fn default_health_check_interval_secs() -> u64 {
    5
}
fn default_port_detect_timeout_secs() -> u64 {
    30
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port_pattern: default_port_pattern(),
            servers: std::collections::HashMap::new(),
            health_check_interval_secs: default_health_check_interval_secs(),
            port_detect_timeout_secs: default_port_detect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub bell: bool,
    #[serde(default)]
    pub system: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            bell: true,
            system: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BeadsConfig {
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
}

impl Default for BeadsConfig {
    fn default() -> Self {
        Self { sync_enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default = "default_network_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_check_host")]
    pub check_host: String,
}

fn default_network_check_interval() -> u64 {
    30
}
fn default_check_host() -> String {
    "github.com:443".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            auto_detect: true,
            check_interval_seconds: default_network_check_interval(),
            check_host: default_check_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeyboardConfig {
    #[serde(default = "default_jump_label_chars")]
    pub jump_label_chars: String,
}

fn default_jump_label_chars() -> String {
    "asdfghjkl".to_string()
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            jump_label_chars: default_jump_label_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecoveryMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecoveryConfig {
    #[serde(default)]
    pub mode: SessionRecoveryMode,
    #[serde(default = "default_auto_recovery_delay_ms")]
    pub auto_recovery_delay_ms: u64,
}

fn default_auto_recovery_delay_ms() -> u64 {
    5_000
}

impl Default for SessionRecoveryConfig {
    fn default() -> Self {
        Self {
            mode: SessionRecoveryMode::default(),
            auto_recovery_delay_ms: default_auto_recovery_delay_ms(),
        }
    }
}

/// Open question, resolved in DESIGN.md: `@az_status` is
/// authoritative; pattern matching is a gated fallback only consulted when
/// the hook value is absent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionStateMonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub pattern_fallback: bool,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for SessionStateMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            pattern_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoardConfig {
    #[serde(default = "default_deps_cache_ttl_secs")]
    pub deps_cache_ttl_secs: u64,
    #[serde(default = "default_git_status_cache_ttl_secs")]
    pub git_status_cache_ttl_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_backstop_secs")]
    pub poll_backstop_secs: u64,
}

fn default_deps_cache_ttl_secs() -> u64 {
    30
}
fn default_git_status_cache_ttl_secs() -> u64 {
    10
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_backstop_secs() -> u64 {
    5
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            deps_cache_ttl_secs: default_deps_cache_ttl_secs(),
            git_status_cache_ttl_secs: default_git_status_cache_ttl_secs(),
            debounce_ms: default_debounce_ms(),
            poll_backstop_secs: default_poll_backstop_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: CURRENT_SCHEMA_VERSION,
            cli_tool: CliTool::default(),
            worktree: WorktreeConfig::default(),
            session: SessionConfig::default(),
            git: GitConfig::default(),
            pr: PrConfig::default(),
            merge: MergeConfig::default(),
            dev_server: DevServerConfig::default(),
            notifications: NotificationsConfig::default(),
            beads: BeadsConfig::default(),
            network: NetworkConfig::default(),
            keyboard: KeyboardConfig::default(),
            session_recovery: SessionRecoveryConfig::default(),
            session_state_monitor: SessionStateMonitorConfig::default(),
            board: BoardConfig::default(),
            logging: LoggingConfig::default(),
            projects: Vec::new(),
            default_project: None,
        }
    }
}

impl Config {
    /// Path to the per-project config file.
    pub fn config_path(project_path: &std::path::Path) -> PathBuf {
        project_path.join(".azedarach").join("config.json")
    }

    pub fn state_dir(project_path: &std::path::Path) -> PathBuf {
        project_path.join(".azedarach")
    }

    /// Load and migrate config for `project_path`, layering compiled-in
    /// defaults, the project file, `~/.config/azedarach/config.json`, and
    /// `AZEDARACH__`-prefixed environment variables, in that order.
    pub fn load(project_path: &std::path::Path, explicit_path: Option<&str>) -> Result<Self> {
        let config_file = Self::config_path(project_path);
        let raw = if config_file.exists() {
            let text =
                std::fs::read_to_string(&config_file).context("failed to read config.json")?;
            Self::migrate(serde_json::from_str(&text).context("invalid config.json")?)?
        } else {
            Config::default()
        };

        let defaults_json =
            serde_json::to_string(&raw).context("failed to serialize config defaults")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("azedarach").join("config.json");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AZEDARACH")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build().context("failed to build configuration")?;
        built
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    pub fn save(&self, project_path: &std::path::Path) -> Result<()> {
        let config_file = Self::config_path(project_path);
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent).context("failed to create .azedarach directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&config_file, json).context("failed to write config.json")?;
        Ok(())
    }

    /// Apply versioned migrations, one function per version bump, until
    /// `raw` reaches [`CURRENT_SCHEMA_VERSION`].
    fn migrate(raw: serde_json::Value) -> Result<Config> {
        let mut value = raw;
        let version = value
            .get("$schema")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1) as u32;

        if version < 2 {
            value = migrate_v1_to_v2(value);
        }

        serde_json::from_value(value).context("failed to deserialize migrated config")
    }
}

/// v1 -> v2: `pr.baseBranch` moved to `git.baseBranch`.
fn migrate_v1_to_v2(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = value.as_object_mut() {
        let moved = obj.get("pr").and_then(|pr| pr.get("baseBranch")).cloned();
        if let Some(base_branch) = moved {
            obj.entry("git")
                .or_insert_with(|| serde_json::json!({}))
                .as_object_mut()
                .map(|git| git.insert("baseBranch".to_string(), base_branch));
            if let Some(pr) = obj.get_mut("pr").and_then(|p| p.as_object_mut()) {
                pr.remove("baseBranch");
            }
        }
        obj.insert("$schema".to_string(), serde_json::json!(2));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.git.base_branch, config.git.base_branch);
    }

    #[test]
    fn migrate_v1_moves_pr_base_branch_to_git() {
        let v1 = serde_json::json!({
            "$schema": 1,
            "pr": { "baseBranch": "develop" }
        });
        let migrated = Config::migrate(v1).unwrap();
        assert_eq!(migrated.git.base_branch, "develop");
        assert_eq!(migrated.schema, 2);
    }

    #[test]
    fn load_save_load_yields_equal_config_after_migration() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::default();
        config.save(temp.path()).unwrap();
        let loaded = Config::load(temp.path(), None).unwrap();
        assert_eq!(loaded.git.branch_prefix, config.git.branch_prefix);
        assert_eq!(loaded.schema, config.schema);
    }
}
