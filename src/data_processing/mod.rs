mod batcher;
mod dataset;
mod embeddings;
mod vocabulary;

pub use batcher::*;
pub use dataset::*;
pub use embeddings::*;
pub use vocabulary::*;
