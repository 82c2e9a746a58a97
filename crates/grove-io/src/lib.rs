//! CSV input and output for the grove pipeline.

mod error;
mod reader;
mod writer;

pub use error::IoError;
pub use reader::{DataReader, Dataset};
pub use writer::PredictionWriter;
