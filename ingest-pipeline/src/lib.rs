pub mod capacity;
pub mod concurrency;
pub mod pause;
pub mod pipeline;
pub mod qntm;
pub mod tokenize;

pub use pipeline::{IngestResult, IngestionConfig, IngestionPipeline};
