//! Reading labeling reports from the input table.

mod reader;
mod record;

pub use reader::{FetchedRecord, SourceReader};
pub use record::{AnalysisRecord, SourceRecord};
