//! Property-based tests for the translation engine.
//!
//! Arbitrary token soups exercise recovery: whatever the input, a parse must
//! finish, and every label it allocated must be marked exactly once
//! (`Listing::finish` checks that and fails otherwise).

use descent::{ParserConfig, Severity, compile};
use proptest::prelude::*;

const FRAGMENTS: &[&str] = &[
  "{", "}", "(", ")", ";", ";", ";", "int", "double", "bool", "string", "x", "y", "f", "if",
  "else", "while", "break", "continue", "return", "=", "+=", "+", "-", "*", "&&", "||", "<",
  "==", "!", "++", "--", "&", "1", "2.5", "\"s\"", "'c'", "true",
];

fn soup() -> impl Strategy<Value = String> {
  prop::collection::vec(prop::sample::select(FRAGMENTS), 0..60).prop_map(|parts| parts.join(" "))
}

const KEYWORDS: &[&str] = &[
  "if", "else", "while", "break", "continue", "return", "int", "bool", "char", "string",
  "double", "true", "false",
];

fn identifier() -> impl Strategy<Value = String> {
  "[a-z_][a-z0-9_]{0,7}".prop_filter("not a keyword", |name| !KEYWORDS.contains(&name.as_str()))
}

proptest! {
  /// Recovery terminates on any token sequence and leaves no dangling label.
  #[test]
  fn prop_any_token_soup_translates_to_a_consistent_module(source in soup()) {
    let compilation = compile(&source, ParserConfig::default());
    prop_assert!(compilation.is_ok(), "{:?}", compilation.err());
  }

  /// The structural severity only changes how failures are counted.
  #[test]
  fn prop_structural_severity_does_not_change_what_is_reported(source in soup()) {
    let strict = compile(&source, ParserConfig::default()).unwrap();
    let lenient = compile(&source, ParserConfig::lenient()).unwrap();

    let strict_messages: Vec<_> = strict.diagnostics.entries().iter().map(|d| &d.message).collect();
    let lenient_messages: Vec<_> = lenient.diagnostics.entries().iter().map(|d| &d.message).collect();
    prop_assert_eq!(strict_messages, lenient_messages);
    prop_assert_eq!(&strict.module, &lenient.module);
    prop_assert!(!strict.accepted || lenient.accepted);
    prop_assert!(
      lenient.diagnostics.with_severity(Severity::Error).count()
        <= strict.diagnostics.with_severity(Severity::Error).count()
    );
  }

  /// Declarations followed by well-typed integer assignments are accepted
  /// with nothing to report.
  #[test]
  fn prop_well_typed_straight_line_programs_are_accepted(
    count in 1usize..6,
    assignments in prop::collection::vec((0usize..6, 0usize..6, 0i32..1000), 0..12),
  ) {
    let mut source = String::from("{");
    for i in 0..count {
      source.push_str(&format!(" int v{i};"));
    }
    for (to, from, k) in assignments {
      source.push_str(&format!(" v{} = v{} + {k};", to % count, from % count));
    }
    source.push_str(" }");

    let compilation = compile(&source, ParserConfig::default()).unwrap();
    prop_assert!(compilation.accepted, "{}", source);
    prop_assert!(compilation.diagnostics.is_empty());
  }

  /// A name declared twice in one block is reported exactly once; in
  /// sibling blocks it is not reported at all.
  #[test]
  fn prop_redeclaration_is_scope_sensitive(name in identifier()) {
    let same = compile(&format!("{{ int {name}; double {name}; }}"), ParserConfig::default()).unwrap();
    prop_assert_eq!(same.diagnostics.with_severity(Severity::Error).count(), 1);

    let disjoint = compile(&format!("{{ int {name}; }} {{ double {name}; }}"), ParserConfig::default()).unwrap();
    prop_assert!(disjoint.accepted);
  }
}
