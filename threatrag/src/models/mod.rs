mod chunk;
mod common;
mod context;
mod document;
mod query;
mod search;
mod validation;

pub use chunk::*;
pub use common::*;
pub use context::*;
pub use document::*;
pub use query::*;
pub use search::*;
pub use validation::*;
