mod assembler;
mod grounding;
mod rag;
mod stats;

pub use assembler::ContextAssembler;
pub use grounding::GroundingValidator;
pub use rag::ThreatRag;
pub use stats::{PipelineStats, StatsSnapshot};
