//! Centralized environment variable registry.
//!
//! All environment variables use the `AZEDARACH__` prefix with `__`
//! separator for nested config paths (e.g. `AZEDARACH__SESSION__MAX_SESSIONS`),
//! consumed by the `config` crate's `Environment` source.

#[derive(Debug, Clone)]
pub struct EnvVar {
    pub name: &'static str,
    pub description: &'static str,
    pub category: EnvVarCategory,
    pub required: bool,
    pub default: Option<&'static str>,
    pub example: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvVarCategory {
    Worktree,
    Session,
    Git,
    Pr,
    DevServer,
    Notifications,
    Beads,
    Network,
    SessionRecovery,
    Logging,
}

impl EnvVarCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            EnvVarCategory::Worktree => "Worktree",
            EnvVarCategory::Session => "Session",
            EnvVarCategory::Git => "Git",
            EnvVarCategory::Pr => "Pull Request",
            EnvVarCategory::DevServer => "Dev Server",
            EnvVarCategory::Notifications => "Notifications",
            EnvVarCategory::Beads => "Beads",
            EnvVarCategory::Network => "Network",
            EnvVarCategory::SessionRecovery => "Session Recovery",
            EnvVarCategory::Logging => "Logging",
        }
    }

    pub fn all() -> &'static [EnvVarCategory] {
        &[
            EnvVarCategory::Worktree,
            EnvVarCategory::Session,
            EnvVarCategory::Git,
            EnvVarCategory::Pr,
            EnvVarCategory::DevServer,
            EnvVarCategory::Notifications,
            EnvVarCategory::Beads,
            EnvVarCategory::Network,
            EnvVarCategory::SessionRecovery,
            EnvVarCategory::Logging,
        ]
    }
}

pub static ENV_VARS: &[EnvVar] = &[
    EnvVar {
        name: "AZEDARACH__WORKTREE__CONTINUE_ON_FAILURE",
        description: "Whether a failing init command stops the remaining ones",
        category: EnvVarCategory::Worktree,
        required: false,
        default: Some("true"),
        example: Some("false"),
    },
    EnvVar {
        name: "AZEDARACH__WORKTREE__PARALLEL",
        description: "Run worktree init commands in parallel instead of sequentially",
        category: EnvVarCategory::Worktree,
        required: false,
        default: Some("false"),
        example: Some("true"),
    },
    EnvVar {
        name: "AZEDARACH__SESSION__COMMAND",
        description: "Coding-agent CLI command launched in each new session",
        category: EnvVarCategory::Session,
        required: false,
        default: Some("claude"),
        example: Some("opencode"),
    },
    EnvVar {
        name: "AZEDARACH__SESSION__MAX_SESSIONS",
        description: "Maximum number of concurrent agent sessions",
        category: EnvVarCategory::Session,
        required: false,
        default: Some("5"),
        example: Some("8"),
    },
    EnvVar {
        name: "AZEDARACH__SESSION__DANGEROUSLY_SKIP_PERMISSIONS",
        description: "Append --dangerously-skip-permissions to the agent start command",
        category: EnvVarCategory::Session,
        required: false,
        default: Some("false"),
        example: Some("true"),
    },
    EnvVar {
        name: "AZEDARACH__GIT__BRANCH_PREFIX",
        description: "Prefix used when naming per-bead branches",
        category: EnvVarCategory::Git,
        required: false,
        default: Some("az-"),
        example: Some("agent/"),
    },
    EnvVar {
        name: "AZEDARACH__GIT__BASE_BRANCH",
        description: "Branch new worktrees are created from and merged back into",
        category: EnvVarCategory::Git,
        required: false,
        default: Some("main"),
        example: Some("develop"),
    },
    EnvVar {
        name: "AZEDARACH__GIT__WORKFLOW_MODE",
        description: "local or origin PR/merge workflow",
        category: EnvVarCategory::Git,
        required: false,
        default: Some("local"),
        example: Some("origin"),
    },
    EnvVar {
        name: "AZEDARACH__PR__ENABLED",
        description: "Enable PR creation via the external forge CLI",
        category: EnvVarCategory::Pr,
        required: false,
        default: Some("true"),
        example: Some("false"),
    },
    EnvVar {
        name: "AZEDARACH__DEV_SERVER__PORT_PATTERN",
        description: "Regex used to detect a dev server's bound port from pane output",
        category: EnvVarCategory::DevServer,
        required: false,
        default: Some(r"(?:localhost|127\.0\.0\.1):(\d+)"),
        example: None,
    },
    EnvVar {
        name: "AZEDARACH__NOTIFICATIONS__BELL",
        description: "Ring the terminal bell on session state changes",
        category: EnvVarCategory::Notifications,
        required: false,
        default: Some("true"),
        example: Some("false"),
    },
    EnvVar {
        name: "AZEDARACH__BEADS__SYNC_ENABLED",
        description: "Enable automatic sync-import-only recovery on SyncRequired",
        category: EnvVarCategory::Beads,
        required: false,
        default: Some("true"),
        example: Some("false"),
    },
    EnvVar {
        name: "AZEDARACH__NETWORK__CHECK_HOST",
        description: "host:port probed to determine online/offline state",
        category: EnvVarCategory::Network,
        required: false,
        default: Some("github.com:443"),
        example: Some("gitlab.com:443"),
    },
    EnvVar {
        name: "AZEDARACH__SESSION_RECOVERY__MODE",
        description: "auto or manual recovery of crashed sessions on startup",
        category: EnvVarCategory::SessionRecovery,
        required: false,
        default: Some("auto"),
        example: Some("manual"),
    },
    EnvVar {
        name: "AZEDARACH__LOGGING__LEVEL",
        description: "Log level (trace, debug, info, warn, error)",
        category: EnvVarCategory::Logging,
        required: false,
        default: Some("info"),
        example: Some("debug"),
    },
    EnvVar {
        name: "AZEDARACH__LOGGING__TO_FILE",
        description: "Write logs to .azedarach/logs in addition to stderr",
        category: EnvVarCategory::Logging,
        required: false,
        default: Some("false"),
        example: Some("true"),
    },
];

pub fn env_vars_for_category(category: EnvVarCategory) -> impl Iterator<Item = &'static EnvVar> {
    ENV_VARS.iter().filter(move |v| v.category == category)
}

pub fn env_vars_by_category() -> Vec<(EnvVarCategory, Vec<&'static EnvVar>)> {
    EnvVarCategory::all()
        .iter()
        .map(|cat| (*cat, env_vars_for_category(*cat).collect()))
        .filter(|(_, vars): &(EnvVarCategory, Vec<&EnvVar>)| !vars.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_env_vars_have_descriptions() {
        for var in ENV_VARS {
            assert!(!var.description.is_empty(), "{} has empty description", var.name);
        }
    }

    #[test]
    fn test_all_env_vars_have_azedarach_prefix() {
        for var in ENV_VARS {
            assert!(
                var.name.starts_with("AZEDARACH__"),
                "{} does not have AZEDARACH__ prefix",
                var.name
            );
        }
    }

    #[test]
    fn test_env_vars_by_category_nonempty() {
        assert!(!env_vars_by_category().is_empty());
    }
}
