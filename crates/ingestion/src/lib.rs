//! Tick ingestion for the replay engine.
//!
//! This crate handles:
//! - Tick sources (single CSV file, partitioned directory with metadata sidecars)
//! - Scan metrics
//! - K-way chronological merge of partitions
//! - Fixed-width bar building

pub mod bar_builder;
pub mod csv_source;
pub mod merge;
pub mod partition;
pub mod source;

pub use bar_builder::BarBuilder;
pub use csv_source::CsvTickSource;
pub use merge::{kmerge, merge_by_heap, merge_by_sort, MergeOutput, TickMerger};
pub use partition::{list_data_files, PartitionMetadata, PartitionedTickSource};
pub use source::{MemoryTickSource, PartitionScan, ScanMetrics, ScanRequest, TickSource};
