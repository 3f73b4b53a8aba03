//! Crate-wide error kinds, unifying the typed subsystem errors.

use thiserror::Error;

use crate::beads::BeadsError;
use crate::git::GitError;
use crate::tmux::TmuxError;

#[derive(Error, Debug)]
pub enum AzError {
    #[error("required tool not found: {name}")]
    ToolMissing { name: String },

    #[error("{name} exited with code {code}: {stderr}")]
    ToolExitNonZero {
        name: String,
        code: i32,
        stderr: String,
    },

    #[error("operation timed out: {op}")]
    Timeout { op: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("conflict on {resource}: {info}")]
    Conflict { resource: String, info: String },

    #[error("merge conflict in {files:?}")]
    MergeConflict { files: Vec<String> },

    #[error("PR operation unavailable: {0}")]
    PrUnavailable(String),

    #[error("tracker out of sync with on-disk store")]
    SyncRequired,

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("invalid config field {field}: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("bead not found: {0}")]
    BeadNotFound(String),

    #[error("no session for bead: {0}")]
    SessionNotFound(String),

    #[error("worktree missing for bead: {0}")]
    WorktreeMissing(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<TmuxError> for AzError {
    fn from(e: TmuxError) -> Self {
        match e {
            TmuxError::TmuxNotAvailable => AzError::ToolMissing {
                name: "tmux".to_string(),
            },
            TmuxError::TmuxExitNonZero { code, stderr } => AzError::ToolExitNonZero {
                name: "tmux".to_string(),
                code,
                stderr,
            },
            TmuxError::NotFound(resource) => AzError::NotFound { resource },
        }
    }
}

impl From<GitError> for AzError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::ToolExitNonZero(stderr) => AzError::ToolExitNonZero {
                name: "git".to_string(),
                code: 1,
                stderr,
            },
            GitError::MergeConflict(files) => AzError::MergeConflict { files },
            GitError::PrUnavailable(reason) => AzError::PrUnavailable(reason),
        }
    }
}

impl From<BeadsError> for AzError {
    fn from(e: BeadsError) -> Self {
        match e {
            BeadsError::SyncRequired => AzError::SyncRequired,
            BeadsError::NotFound(id) => AzError::BeadNotFound(id),
            BeadsError::ToolMissing => AzError::ToolMissing {
                name: "bd".to_string(),
            },
            BeadsError::CommandFailed { code, stderr } => AzError::ToolExitNonZero {
                name: "bd".to_string(),
                code,
                stderr,
            },
        }
    }
}
