//! Diagnostics sink.
//!
//! The engine never aborts on a problem in the source program; it reports it
//! here and carries on. Only `Severity::Error` entries count towards the
//! total that gates acceptance.

use std::fmt;

use tracing::debug;

use crate::error::caret;
use crate::tokenizer::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
  Note,
  Warning,
  Error,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Note => write!(f, "note"),
      Severity::Warning => write!(f, "warning"),
      Severity::Error => write!(f, "error"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub severity: Severity,
  pub pos: Pos,
  pub message: String,
}

impl Diagnostic {
  /// Render with the offending source line and a caret under the column.
  pub fn render(&self, source: &str) -> String {
    let (snippet, marker) = caret(source, self.pos);
    format!("{self}\n{snippet}\n{marker}")
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}: {}", self.pos, self.severity, self.message)
  }
}

pub trait Diagnostics {
  fn report(&mut self, severity: Severity, pos: Pos, message: String);
  fn error_count(&self) -> usize;

  fn error(&mut self, pos: Pos, message: String) {
    self.report(Severity::Error, pos, message);
  }

  fn warning(&mut self, pos: Pos, message: String) {
    self.report(Severity::Warning, pos, message);
  }

  fn note(&mut self, pos: Pos, message: String) {
    self.report(Severity::Note, pos, message);
  }
}

/// Collects every diagnostic in arrival order.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
  entries: Vec<Diagnostic>,
}

impl DiagnosticBag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[Diagnostic] {
    &self.entries
  }

  pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
    self
      .entries
      .iter()
      .filter(move |diagnostic| diagnostic.severity == severity)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl Diagnostics for DiagnosticBag {
  fn report(&mut self, severity: Severity, pos: Pos, message: String) {
    debug!(%severity, %pos, %message, "diagnostic");
    self.entries.push(Diagnostic {
      severity,
      pos,
      message,
    });
  }

  fn error_count(&self) -> usize {
    self.with_severity(Severity::Error).count()
  }
}
