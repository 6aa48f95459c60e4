//! Prompt construction and analysis.

pub mod normalize;
pub mod optimizer;
pub mod quality;
pub mod technique;
pub mod template;

pub use optimizer::{
    DropInfo, LayerStats, OptimizationReport, OptimizerSettings, PromptOptimizer,
};
pub use quality::{PromptQuality, analyze};
pub use technique::{Technique, apply_techniques};
pub use template::{TaskKind, decision_protocol, system_prompt};
