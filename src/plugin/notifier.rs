//! Notifier plugin contract (spec.md §4.5, §4.2 suppression rule).
//!
//! Implementations must tolerate rate-limit responses: retry on 429 and 5xx
//! with exponential backoff, never retry on other 4xx, and treat network
//! timeouts as transient. The core does not implement that retry loop for
//! any specific transport — it only classifies a notifier's failure as
//! [`crate::OrchestratorError::TransientError`] when the notifier reports
//! one, so callers can decide whether to retry at the reaction-engine level.

use crate::event::Event;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Delivers `event`. May filter by `event.event_type` internally and
    /// return `Ok(())` without actually sending.
    async fn notify(&self, event: &Event) -> Result<()>;
}
