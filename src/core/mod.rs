//! Model validation

pub mod model_validator;

pub use model_validator::{validate_database, validate_file, ModelValidator, ValidationReport};
