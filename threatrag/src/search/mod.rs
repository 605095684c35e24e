mod keyword;
mod retriever;
mod scoring;

pub use keyword::keyword_score;
pub use retriever::HybridRetriever;
pub use scoring::{CompositeScorer, RecencyDecay, ScoreWeights};
