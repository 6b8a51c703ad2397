//! Crate-level error type.
//!
//! Problems in the *source program* never surface here: they are reported to
//! the diagnostics sink and the parse keeps going. `CompileError` covers the
//! two things that stop the pipeline outright – a lexical failure, and a
//! backend invariant being broken by the engine.

use snafu::Snafu;

use crate::tokenizer::Pos;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{line}:{column}: {message}\n{snippet}\n{marker}"))]
  Lex {
    line: usize,
    column: usize,
    snippet: String,
    marker: String,
    message: String,
  },

  #[snafu(display("label L{label} was marked more than once"))]
  LabelMarkedTwice { label: u32 },

  #[snafu(display("label L{label} was allocated but never marked"))]
  LabelNeverMarked { label: u32 },
}

impl CompileError {
  /// Construct a lexical error anchored at a position in the source.
  pub fn at(source: &str, pos: Pos, message: impl Into<String>) -> Self {
    let (snippet, marker) = caret(source, pos);
    Self::Lex {
      line: pos.line,
      column: pos.column,
      snippet,
      marker,
      message: message.into(),
    }
  }
}

/// The source line containing `pos` and a marker line with a caret under the
/// offending column.
pub fn caret(source: &str, pos: Pos) -> (String, String) {
  let snippet = source
    .lines()
    .nth(pos.line.saturating_sub(1))
    .unwrap_or_default()
    .to_string();
  let offset = pos.column.saturating_sub(1).min(snippet.chars().count());
  let marker = format!("{}^", " ".repeat(offset));
  (snippet, marker)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn caret_points_at_column_on_the_right_line() {
    let source = "int x;\nx = @;\n";
    let (snippet, marker) = caret(source, Pos::new(2, 5));
    assert_eq!(snippet, "x = @;");
    assert_eq!(marker, "    ^");
  }

  #[test]
  fn lex_error_display_includes_location_and_marker() {
    let err = CompileError::at("a $", Pos::new(1, 3), "invalid token: '$'");
    let text = err.to_string();
    assert!(text.starts_with("1:3: invalid token: '$'"));
    assert!(text.ends_with("a $\n  ^"));
  }
}
