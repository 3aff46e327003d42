//! bimforge - Tableau workbook to Power BI semantic model converter
//!
//! This library reads the data model of a Tableau workbook (`.twb`), translates
//! its calculated fields to DAX, and assembles a tabular model document
//! (`Model.bim`).
//!
//! # Pipeline
//!
//! - [`extractor`]: tables, typed columns, relationships, calculations and the
//!   measure → table index from the workbook XML
//! - [`dax`]: ordered rewrite rules from workbook formulas to DAX, including
//!   level-of-detail expressions and reference cleanup
//! - [`model`]: model assembly, date tables and measure placement
//! - [`core`]: read-only validation of the assembled document
//!
//! # Example
//!
//! ```no_run
//! use bimforge::config::ConverterConfig;
//! use bimforge::pipeline::convert_str;
//!
//! let xml = std::fs::read_to_string("Superstore.twb")?;
//! let conversion = convert_str(&xml, "Superstore_Model", None, &ConverterConfig::default())?;
//!
//! println!("Tables: {}", conversion.database.model.tables.len());
//! println!("Valid: {}", conversion.validation.is_valid);
//! # Ok::<(), bimforge::error::BimError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod dax;
pub mod error;
pub mod extractor;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use config::ConverterConfig;
pub use dax::FormulaTranslator;
pub use error::{BimError, BimResult};
pub use model::Database;
pub use types::{CalculationRecord, Classification, TranslatedFormula};
