//! Abstract interpretation of Solidity sources in the interval domain.
//!
//! The pipeline has three stages: the solc JSON AST is ingested by
//! `front_end`, lowered into a control-flow graph of labeled nodes by
//! `middle_end::cfg`, and then `middle_end::analysis` runs a chaotic-iteration
//! fixpoint of the collecting semantics over that graph.

pub mod commons;
pub mod front_end;
pub mod middle_end;
