//! Shared error taxonomy and the validated-input wrapper.

use thiserror::Error;

use crate::middle_end::analysis::interval::DomainError;

/// A value that has passed validation.
///
/// The only way to get one is to call the corresponding `validate` method, so
/// any function taking `Valid<T>` can rely on the validation invariants.
#[derive(Clone, Debug)]
pub struct Valid<T>(pub T);

pub type AnalysisResult<T, E = AnalysisError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unsupported AST node kind `{0}`")]
    UnsupportedAstNode(String),

    #[error("assignment target of `{node}` is not a direct identifier")]
    UnsupportedLValue { node: String },

    #[error("identifier `{0}` is neither a variable nor a registered constant")]
    UnknownIdentifier(String),

    #[error("malformed AST: {0}")]
    MalformedAst(String),

    #[error("abstract domain failure: {0}")]
    Domain(#[from] DomainError),

    #[error("no fixed point after {0} rounds, iteration budget exhausted")]
    IterationBudgetExhausted(usize),
}
