//! Context assembly: from a task to a ranked stream of repository material.
//!
//! | Source | Candidate | Fetched |
//! |--------|-----------|---------|
//! | Target issue | metadata, comment thread | at assembly |
//! | Target pull request | metadata, one diff per file | at assembly |
//! | Requested issues / PRs | as above | at assembly |
//! | Repository tree | one block per text file | on `next()` |

pub mod assembler;
pub mod scoring;

pub use assembler::{AssemblerSettings, ContextAssembler, ContextStream};
pub use scoring::{
    Candidate, CompositeScorer, KeywordOverlapScorer, PathProximityScorer, RelevanceScorer,
    ScoringContext, TargetMatchScorer,
};
