//! Built-in plugin implementations, registered at startup before any
//! external plugin load (spec.md §9).

mod generic_agent;
mod git_workspace;
mod pty_runtime;

pub use generic_agent::GenericAgent;
pub use git_workspace::{BranchWorkspace, WorktreeWorkspace};
pub use pty_runtime::{PtyRuntime, RingBuffer};
