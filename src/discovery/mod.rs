//! Opportunity discovery: one pass over the active asset pool per run, either
//! on demand or from the background scheduler.

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{DiscoveryPipeline, PipelineSettings};
pub use scheduler::DiscoveryScheduler;
