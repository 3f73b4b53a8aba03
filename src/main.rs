use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use azedarach::config::Config;
use azedarach::session::StartOptions;
use azedarach::supervisor::Supervisor;
use azedarach::tmux::{check_tmux_version, SystemTmuxClient, TmuxError};

#[derive(Parser)]
#[command(name = "azedarach")]
#[command(about = "Terminal control plane for orchestrating parallel AI coding agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to the current directory)
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session for a bead
    Start {
        bead_id: String,
        /// Launch the agent with the standard start-of-work prompt
        #[arg(short, long)]
        with_work: bool,
        /// Pass --dangerously-skip-permissions to the agent
        #[arg(long)]
        yolo: bool,
    },
    /// Stop a bead's session, leaving the worktree in place
    Stop { bead_id: String },
    /// Pause a bead's session (Ctrl-C + best-effort WIP commit)
    Pause { bead_id: String },
    /// Resume a paused bead's session
    Resume { bead_id: String },
    /// Re-create the tmux session for a bead whose worktree still exists
    Recover { bead_id: String },
    /// List active sessions
    List,
    /// Stop a session and remove its worktree
    Cleanup { bead_id: String },
}

fn check_external_tools() -> std::result::Result<(), String> {
    for tool in ["git", "bd"] {
        if which::which(tool).is_err() {
            return Err(tool.to_string());
        }
    }
    Ok(())
}

fn print_tmux_error(err: &TmuxError) {
    eprintln!("Error: {err}");
    eprintln!();
    match err {
        TmuxError::TmuxNotAvailable => {
            eprintln!("tmux is required to run azedarach.");
            eprintln!();
            eprintln!("Install tmux:");
            eprintln!("  macOS:         brew install tmux");
            eprintln!("  Ubuntu/Debian: sudo apt install tmux");
            eprintln!("  Fedora/RHEL:   sudo dnf install tmux");
            eprintln!("  Arch:          sudo pacman -S tmux");
        }
        _ => {
            eprintln!("Please ensure tmux is properly installed and working.");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let project_path = match cli.project {
        Some(p) => p,
        None => std::env::current_dir()?,
    };

    let system_tmux = SystemTmuxClient::new();
    if let Err(err) = check_tmux_version(&system_tmux) {
        print_tmux_error(&err);
        return Ok(ExitCode::from(3));
    }
    if let Err(tool) = check_external_tools() {
        eprintln!("Error: `{tool}` is required but was not found on PATH.");
        return Ok(ExitCode::from(3));
    }

    let config = Config::load(&project_path, cli.config.as_deref())?;
    let _logging = azedarach::logging::init_logging(&config, &project_path, cli.debug)?;

    let mut ctx = Supervisor::start(project_path, config).await?;

    match cli.command {
        Commands::Start {
            bead_id,
            with_work,
            yolo,
        } => {
            let record = ctx
                .sessions
                .start(&bead_id, StartOptions { with_work, yolo }, None)
                .await?;
            println!("Started session {} at {}", record.tmux_session_name, record.worktree_path.display());
        }
        Commands::Stop { bead_id } => {
            ctx.sessions.stop(&bead_id).await?;
            println!("Stopped session for {bead_id}");
        }
        Commands::Pause { bead_id } => {
            ctx.sessions.pause(&bead_id).await?;
            println!("Paused session for {bead_id}");
        }
        Commands::Resume { bead_id } => {
            ctx.sessions.resume(&bead_id).await?;
            println!("Resumed session for {bead_id}");
        }
        Commands::Recover { bead_id } => {
            let record = ctx.sessions.recover(&bead_id).await?;
            println!("Recovered session {}", record.tmux_session_name);
        }
        Commands::List => {
            let active = ctx.sessions.list_active().await?;
            if active.is_empty() {
                println!("No active sessions");
            } else {
                for record in active {
                    println!(
                        "{}  {}  {:?}",
                        record.bead_id, record.tmux_session_name, record.last_known_state
                    );
                }
            }
        }
        Commands::Cleanup { bead_id } => {
            ctx.sessions.cleanup(&bead_id).await?;
            println!("Cleaned up {bead_id}");
        }
    }

    // Drain any toasts produced by the command so they aren't silently lost.
    while let Ok(toast) = ctx.toasts.try_recv() {
        eprintln!("[{:?}] {}", toast.level, toast.text);
    }

    Ok(ExitCode::SUCCESS)
}
