//! Tracker plugin contract (spec.md GLOSSARY; expanded in SPEC_FULL.md §4.5).
//!
//! The Lifecycle Controller's state machine is driven by terminal activity
//! and SCM signals only — tracker state never gates a status transition.
//! A missing tracker binding is not an error; callers that want issue
//! display data simply get `None` back.

use crate::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub state: String,
    pub url: String,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_issue(&self, issue_id: &str) -> Result<Option<Issue>>;
}
