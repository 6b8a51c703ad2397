use std::fmt;

/// Value types known to the engine. `Named` is for host-defined types that
/// the registry (or its external hook) resolves by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
  Int32,
  Boolean,
  Char,
  String,
  Double,
  Named(String),
}

/// Outcome of combining two operand types under an arithmetic operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Combined {
  /// Both operands already had the result type.
  Exact(Type),
  /// An `Int32` operand was implicitly widened to `Double`.
  Widened(Type),
}

impl Type {
  /// The built-in types bound in the universe scope, keyed by keyword.
  pub fn primitives() -> [(&'static str, Type); 5] {
    [
      ("int", Type::Int32),
      ("bool", Type::Boolean),
      ("char", Type::Char),
      ("string", Type::String),
      ("double", Type::Double),
    ]
  }

  pub fn is_numeric(&self) -> bool {
    matches!(self, Type::Int32 | Type::Double)
  }

  pub fn is_boolean(&self) -> bool {
    matches!(self, Type::Boolean)
  }

  pub fn is_string(&self) -> bool {
    matches!(self, Type::String)
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Int32 => f.write_str("int"),
      Type::Boolean => f.write_str("bool"),
      Type::Char => f.write_str("char"),
      Type::String => f.write_str("string"),
      Type::Double => f.write_str("double"),
      Type::Named(name) => f.write_str(name),
    }
  }
}

/// Numeric promotion shared by the additive and multiplicative operators.
/// Returns `None` when either side is not numeric.
pub fn numeric(lhs: &Type, rhs: &Type) -> Option<Combined> {
  match (lhs, rhs) {
    (Type::Int32, Type::Int32) => Some(Combined::Exact(Type::Int32)),
    (Type::Double, Type::Double) => Some(Combined::Exact(Type::Double)),
    (Type::Int32, Type::Double) | (Type::Double, Type::Int32) => {
      Some(Combined::Widened(Type::Double))
    }
    _ => None,
  }
}

/// Whether a value of type `from` may be stored into a slot of type `to`.
pub fn assignable(to: &Type, from: &Type) -> Option<Combined> {
  match (to, from) {
    _ if to == from => Some(Combined::Exact(to.clone())),
    (Type::Double, Type::Int32) => Some(Combined::Widened(Type::Double)),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numeric_promotion_table() {
    assert_eq!(
      numeric(&Type::Int32, &Type::Int32),
      Some(Combined::Exact(Type::Int32))
    );
    assert_eq!(
      numeric(&Type::Int32, &Type::Double),
      Some(Combined::Widened(Type::Double))
    );
    assert_eq!(
      numeric(&Type::Double, &Type::Int32),
      Some(Combined::Widened(Type::Double))
    );
    assert_eq!(
      numeric(&Type::Double, &Type::Double),
      Some(Combined::Exact(Type::Double))
    );
    assert_eq!(numeric(&Type::Boolean, &Type::Int32), None);
    assert_eq!(numeric(&Type::Char, &Type::Char), None);
  }

  #[test]
  fn assignment_only_widens_int_into_double() {
    assert!(matches!(
      assignable(&Type::Double, &Type::Int32),
      Some(Combined::Widened(_))
    ));
    assert_eq!(assignable(&Type::Int32, &Type::Double), None);
    assert_eq!(
      assignable(&Type::Named("point".into()), &Type::Named("point".into())),
      Some(Combined::Exact(Type::Named("point".into())))
    );
  }

  #[test]
  fn displays_source_spelling() {
    assert_eq!(Type::Int32.to_string(), "int");
    assert_eq!(Type::Named("vec".into()).to_string(), "vec");
  }
}
