//! Iteration steps: which input rows each node invocation receives.

pub mod builder;
pub mod settings;
pub mod step;

pub use builder::IterationStepBuilder;
pub use settings::{
    ColumnMatching, IterationSettings, IterationStrategy, MultipleMatchPolicy, StepLimit,
    DATA_SET_KEY_PREFIX,
};
pub use step::{IterationStep, SkippedRow, StepPlan};
