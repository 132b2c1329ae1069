// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod msi;
pub mod preflight;
pub mod step;

// Re-export common types for convenience
pub use engine::{PipelineOutcome, ResolvedPlan};
pub use error::{Error, ErrorCode, Result};
pub use step::{StdinSource, StepDescriptor, StepInput};
