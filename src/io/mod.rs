pub mod dataset;
pub mod params;

pub use dataset::{AggregatedDataset, Dataset};
