//! Progress callbacks for research sessions.

use std::panic::{AssertUnwindSafe, catch_unwind};

use kwresearch_shared::{KeywordOutcome, PipelineState, ResearchSessionResult};
use tracing::warn;

/// Receives state transitions while a session runs.
///
/// Called from worker tasks, possibly concurrently; implementations must not block.
pub trait ProgressReporter: Send + Sync {
    /// Called once before any keyword is dispatched.
    fn session_started(&self, total_keywords: usize);
    /// Called whenever a keyword's pipeline changes state.
    fn state_changed(&self, index: usize, keyword: &str, state: PipelineState);
    /// Called once per keyword with its final outcome.
    fn keyword_finished(&self, index: usize, outcome: &KeywordOutcome);
    /// Called after aggregation.
    fn session_finished(&self, result: &ResearchSessionResult);
}

/// Invoke a reporter callback. A panicking reporter is logged and otherwise ignored.
pub(crate) fn notify(event: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(event, "progress reporter panicked");
    }
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn session_started(&self, _total_keywords: usize) {}
    fn state_changed(&self, _index: usize, _keyword: &str, _state: PipelineState) {}
    fn keyword_finished(&self, _index: usize, _outcome: &KeywordOutcome) {}
    fn session_finished(&self, _result: &ResearchSessionResult) {}
}
