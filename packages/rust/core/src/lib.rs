//! Research orchestration for kwresearch.
//!
//! Runs a Search → Fetch → Analyze → Assemble pipeline per keyword on a
//! bounded worker pool and merges the successful reports into one summary.

pub mod aggregator;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod research;
pub mod stage;

#[cfg(test)]
mod testing;

pub use aggregator::{DEFAULT_QUALITY_THRESHOLD, aggregate};
pub use orchestrator::{Orchestrator, OrchestratorOutput};
pub use pipeline::PipelineSettings;
pub use progress::{ProgressReporter, SilentProgress};
pub use research::{ResearchOptions, run_research};
pub use stage::{RetryPolicy, StageExecutor, StageTask};
