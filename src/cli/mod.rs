//! CLI command handlers

pub mod commands;

pub use commands::{batch, calcs, clean, convert, translate, validate};
