//! Runtime plugin contract: the host abstraction that owns an agent process
//! (spec.md §3 `RuntimeHandle`, §4.5 `Runtime`).

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Discriminated handle identifying where a runtime is hosting a session.
///
/// `id` is the identifier the runtime implementation uses to address its
/// host (e.g. a terminal-multiplexer session name); user-facing session ids
/// never include the instance-hash prefix that a runtime-facing name does
/// (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub id: String,
    pub runtime_name: String,
    pub data: HashMap<String, String>,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts a host process bound to `handle.id`, in `cwd`, with `env`.
    async fn create(
        &self,
        handle: &RuntimeHandle,
        env: &HashMap<String, String>,
        cwd: &std::path::Path,
    ) -> Result<()>;

    /// Best-effort termination of the host.
    async fn destroy(&self, handle: &RuntimeHandle) -> Result<()>;

    /// Sends input text to the hosted process.
    async fn send_message(&self, handle: &RuntimeHandle, text: &str) -> Result<()>;

    /// Reads up to `lines` of recent output from the host.
    async fn get_output(&self, handle: &RuntimeHandle, lines: usize) -> Result<String>;

    /// Whether the host is still alive.
    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool>;
}
