use crate::diag::Severity;

/// Knobs for the translation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
  /// Severity for a missing `;`, `(`, `)`, `{` or `}`. Only `Severity::Error`
  /// makes such a failure count against acceptance; the engine resynchronizes
  /// either way.
  pub structural_severity: Severity,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      structural_severity: Severity::Error,
    }
  }
}

impl ParserConfig {
  pub fn with_structural_severity(mut self, severity: Severity) -> Self {
    self.structural_severity = severity;
    self
  }

  /// Structural failures are reported as warnings and do not gate acceptance.
  pub fn lenient() -> Self {
    Self::default().with_structural_severity(Severity::Warning)
  }
}
