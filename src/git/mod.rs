//! Git Adapter: branch ops, merge, diff/stat, PR creation.
//!
//! `cli.rs` is the raw `git`/`gh` process wrapper: static async methods over
//! `tokio::process::Command`. `adapter.rs` is the typed façade the rest of
//! the crate calls, mapping raw errors onto the error kinds this crate
//! defines.

pub mod adapter;
pub mod cli;
pub mod pr;

pub use adapter::{GitAdapter, GitError};
pub use cli::{GitCli, MergeOutcome, WorktreeEntry};
pub use pr::{CreatePrError, GhCli, PrSummary};
