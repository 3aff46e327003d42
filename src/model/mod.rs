//! Destination model: document types, assembly and measure placement

pub mod bim;
mod assembler;
mod date_tables;
mod format;
mod resolver;

pub use assembler::{build_column, MeasureStats, ModelAssembler};
pub use bim::{Column, Database, Measure, Model, Partition, Relationship, Table};
pub use date_tables::{build_date_tables, is_date_table, local_date_table, template_table};
pub use format::measure_format_string;
pub use resolver::{CandidateTable, MeasureTableResolver, Resolution, ResolutionSource};
