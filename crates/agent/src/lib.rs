//! The orchestration loop and prompt optimizer: the heart of Forgepilot.
//!
//! A run follows an **Assemble → Optimize → Decide → Act** cycle:
//!
//! 1. **Assemble** ranked context from the repository host (issues, pull
//!    requests, diffs, files), lazily and in relevance order
//! 2. **Optimize** it into a prompt that fits the token budget
//! 3. **Send to the model** through the retry policy
//! 4. **Parse the decision block**: complete, request more context, or act
//! 5. **Execute actions** idempotently, then feed results into the next turn
//!
//! The loop ends when the model declares the task complete, a fatal error
//! occurs, the turn limit is reached, or the run is cancelled.

pub mod context;
pub mod decision;
pub mod executor;
pub mod orchestrator;
pub mod prompt;

#[cfg(test)]
mod test_helpers;

pub use context::{
    AssemblerSettings, CompositeScorer, ContextAssembler, ContextStream, RelevanceScorer,
};
pub use decision::{interpret, parse_decision};
pub use executor::ActionExecutor;
pub use orchestrator::{Orchestrator, RunSettings};
pub use prompt::{
    OptimizationReport, OptimizerSettings, PromptOptimizer, PromptQuality, TaskKind, Technique,
    analyze,
};
