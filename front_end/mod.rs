//! Frontend: ingestion of the solc JSON AST.
//!
//! The compiler itself is an external collaborator; all we see is the AST it
//! wrote out. `ast` is the typed schema plus validation, `loader` reads the
//! files.

pub mod ast;
pub mod loader;
