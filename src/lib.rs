//! Crate root: wires together the translation pipeline.
//!
//! - `tokenizer` turns source text into a token stream.
//! - `parser` recognizes the grammar and, in the same pass, type-checks and
//!   drives code generation.
//! - `symbols`, `codegen` and `diag` are the collaborators the parser talks
//!   to through traits; each ships one in-tree implementation.
//! - `error` holds the failures that stop a compilation outright, as opposed
//!   to diagnostics about the program being translated.

pub mod codegen;
pub mod config;
pub mod diag;
pub mod error;
pub mod parser;
pub mod symbols;
pub mod tokenizer;
pub mod ty;

use tracing::info;

pub use codegen::Module;
pub use config::ParserConfig;
pub use diag::{DiagnosticBag, Severity};
pub use error::{CompileError, CompileResult};
pub use symbols::ScopedTable;

/// Outcome of one translation.
#[derive(Debug)]
pub struct Compilation {
  pub accepted: bool,
  pub module: Module,
  pub diagnostics: DiagnosticBag,
}

/// Translate `source` with only the predefined types in scope.
pub fn compile(source: &str, config: ParserConfig) -> CompileResult<Compilation> {
  compile_with(source, config, ScopedTable::new())
}

/// Translate `source` against a caller-prepared registry, e.g. one with an
/// external type hook installed.
pub fn compile_with(
  source: &str,
  config: ParserConfig,
  mut registry: ScopedTable,
) -> CompileResult<Compilation> {
  let mut tokens = tokenizer::TokenStream::new(tokenizer::tokenize(source)?);
  let mut listing = codegen::Listing::new();
  let mut diagnostics = DiagnosticBag::new();

  let accepted = parser::Parser::new(
    &mut tokens,
    &mut registry,
    &mut listing,
    &mut diagnostics,
    config,
  )
  .parse();

  let module = listing.finish()?;
  info!(
    accepted,
    functions = module.functions.len(),
    diagnostics = diagnostics.entries().len(),
    "compiled"
  );
  Ok(Compilation {
    accepted,
    module,
    diagnostics,
  })
}
