pub mod checkpoint;
pub mod data_processing;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod training;

pub use error::{Error, Result};
