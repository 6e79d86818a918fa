//! Loading compiler-produced AST files.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use super::ast::SourceUnit;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read the AST file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode the AST: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a source unit from JSON text. Accepts either a bare `SourceUnit`
/// or a compiler envelope of the form `{"ast": ...}`.
pub fn parse_source_unit(text: &str) -> Result<SourceUnit, LoadError> {
    let value: Value = serde_json::from_str(text)?;
    let ast = match value.get("ast") {
        Some(inner) => inner.clone(),
        None => value,
    };
    Ok(serde_json::from_value(ast)?)
}

pub fn load(path: &Path) -> Result<SourceUnit, LoadError> {
    let text = fs::read_to_string(path)?;
    parse_source_unit(&text)
}
