//! CLI command definitions.
//!
//! The CLI is explicitly out of scope for the core (spec.md §1): this is a
//! thin clap surface over `SessionManager`/`LifecycleController`, not a
//! feature in its own right.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ao")]
#[command(about = "Orchestrates concurrent AI coding-agent sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the ao.toml configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project id to operate against (required when the config defines more
    /// than one project).
    #[arg(long, global = true)]
    pub project: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spawn a new session.
    Spawn {
        /// Tracker issue id to associate with the session, if any.
        #[arg(long)]
        issue: Option<String>,

        /// Base branch to create the workspace from (defaults to the
        /// project's default branch).
        #[arg(long)]
        branch: Option<String>,

        /// Initial prompt to send to the agent once launched.
        #[arg(long)]
        prompt: Option<String>,

        /// Attest that this spawn is backed by a validated plan task
        /// (required under `requireValidatedPlanTask`).
        #[arg(long)]
        validated_plan_task: bool,
    },

    /// List sessions.
    List,

    /// Show one session.
    Get {
        id: String,
    },

    /// Send input to a session's hosted process.
    Send {
        id: String,
        message: String,
    },

    /// Kill a session.
    Kill {
        id: String,
    },

    /// Restore a previously killed session on its original branch.
    Restore {
        id: String,
    },

    /// Kill sessions whose PR is merged or whose process has exited.
    Cleanup {
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one on-demand lifecycle evaluation for a session.
    Check {
        id: String,
    },

    /// Run lifecycle evaluation ticks on the configured interval until
    /// interrupted.
    Tick,

    /// Print recently recorded lifecycle diagnostics.
    Doctor,
}
