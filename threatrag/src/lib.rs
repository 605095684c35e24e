//! Retrieval and ranking core for retrieval-augmented generation over cyber
//! threat intelligence.
//!
//! Write path: [`processing::Chunker`] → [`embeddings::EmbeddingGateway`] →
//! [`index::VectorIndex`]. Read path: [`search::HybridRetriever`] →
//! [`services::ContextAssembler`] → an external [`llm::CompletionService`] →
//! [`services::GroundingValidator`]. [`ThreatRag`] wires both together.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod processing;
pub mod retry;
pub mod search;
pub mod services;

pub use config::Config;
pub use error::{RagError, Result};
pub use services::ThreatRag;
