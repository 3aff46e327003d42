//! Converter configuration
//!
//! Every pipeline stage receives the configuration by reference. Values can be
//! loaded from a YAML file; missing keys fall back to the defaults below.

use crate::error::{BimError, BimResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Table name used when a workbook yields no table at all
pub const FALLBACK_TABLE: &str = "YourTable";

/// Default partition source (Power Query M), `{table}` is replaced per table
pub const DEFAULT_PARTITION_TEMPLATE: &str = "let\n    Source = Csv.Document(File.Contents(\"{table}.csv\"),[Delimiter=\",\", Encoding=65001, QuoteStyle=QuoteStyle.Csv]),\n    #\"Promoted Headers\" = Table.PromoteHeaders(Source, [PromoteAllScalars=true])\nin\n    #\"Promoted Headers\"";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Table used to qualify unqualified column references
    pub default_table: String,
    /// Translate and attach workbook calculations as measures
    pub extract_measures: bool,
    /// Replace a measure that already exists on the owning table
    pub replace_existing_measures: bool,
    pub compatibility_level: u32,
    pub culture: String,
    pub partition_template: String,
    /// File extensions recognized in `(name.ext)` column annotations
    pub source_extensions: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            default_table: FALLBACK_TABLE.to_string(),
            extract_measures: true,
            replace_existing_measures: true,
            compatibility_level: 1550,
            culture: "en-US".to_string(),
            partition_template: DEFAULT_PARTITION_TEMPLATE.to_string(),
            source_extensions: ["csv", "txt", "xls", "xlsx", "hyper", "tde"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ConverterConfig {
    /// Load a configuration file (YAML)
    pub fn load(path: &Path) -> BimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConverterConfig = serde_yaml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> BimResult<()> {
        if self.default_table.trim().is_empty() {
            return Err(BimError::Config("default_table must not be empty".to_string()));
        }
        if !self.partition_template.contains("{table}") {
            return Err(BimError::Config(
                "partition_template must contain a {table} placeholder".to_string(),
            ));
        }
        if self
            .source_extensions
            .iter()
            .any(|ext| ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(BimError::Config(
                "source_extensions must be plain alphanumeric extensions".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = table.into();
        self
    }

    pub fn with_extract_measures(mut self, extract: bool) -> Self {
        self.extract_measures = extract;
        self
    }

    /// Strip a known source-file extension from a relation or file name
    pub fn strip_extension<'a>(&self, name: &'a str) -> &'a str {
        if let Some((stem, ext)) = name.rsplit_once('.') {
            if !stem.is_empty()
                && self
                    .source_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            {
                return stem;
            }
        }
        name
    }
}
