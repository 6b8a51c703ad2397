//! Type & symbol registry.
//!
//! Scopes form a stack whose bottom entry is the universe scope holding the
//! predefined type symbols. Each compound statement pushes a block scope and
//! pops it on exit, so a symbol stops resolving once its block closes.

use std::collections::HashMap;
use std::fmt;

use crate::codegen::LocalSlot;
use crate::tokenizer::Pos;
use crate::ty::Type;

/// A function takes exactly one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
  pub param: Type,
  pub ret: Type,
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.ret, self.param)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
  /// Names a type: the predefined primitives and host-registered types.
  Type(Type),
  /// `frame` is the function nesting depth that owns `slot`; 0 is the entry.
  Local {
    ty: Type,
    slot: LocalSlot,
    frame: usize,
  },
  /// `link_name` is unique across the module, unlike the source name.
  Function {
    signature: Signature,
    link_name: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub name: String,
  pub kind: SymbolKind,
  /// Where the declaration appeared; `None` for predefined symbols.
  pub pos: Option<Pos>,
}

impl Symbol {
  pub fn as_type(&self) -> Option<&Type> {
    match &self.kind {
      SymbolKind::Type(ty) => Some(ty),
      _ => None,
    }
  }
}

pub trait Registry {
  fn bind_universe_symbol(&mut self, name: &str, ty: Type);
  fn declare_local(&mut self, name: &str, ty: Type, slot: LocalSlot, frame: usize, pos: Pos);
  fn declare_function(&mut self, name: &str, link_name: &str, signature: Signature, pos: Pos);
  fn exists_in_current_scope(&self, name: &str) -> bool;
  fn lookup(&self, name: &str) -> Option<Symbol>;
  /// Last-resort lookup for type names the registry does not store itself.
  fn resolve_external_type(&self, name: &str) -> Option<Type>;
  fn open_scope(&mut self);
  fn close_scope(&mut self);
}

type ExternalTypes = Box<dyn Fn(&str) -> Option<Type>>;

/// Stack of hash-map scopes over a universe scope.
pub struct ScopedTable {
  scopes: Vec<HashMap<String, Symbol>>,
  external: Option<ExternalTypes>,
}

impl Default for ScopedTable {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopedTable {
  /// A table holding only an empty universe scope.
  pub fn new() -> Self {
    Self {
      scopes: vec![HashMap::new()],
      external: None,
    }
  }

  /// Install the hook consulted for type names the table does not know.
  pub fn with_external_types(mut self, resolve: impl Fn(&str) -> Option<Type> + 'static) -> Self {
    self.external = Some(Box::new(resolve));
    self
  }

  /// Number of open scopes, the universe included.
  pub fn depth(&self) -> usize {
    self.scopes.len()
  }

  fn bind(&mut self, symbol: Symbol) {
    if let Some(scope) = self.scopes.last_mut() {
      scope.insert(symbol.name.clone(), symbol);
    }
  }
}

impl Registry for ScopedTable {
  fn bind_universe_symbol(&mut self, name: &str, ty: Type) {
    let symbol = Symbol {
      name: name.to_string(),
      kind: SymbolKind::Type(ty),
      pos: None,
    };
    self.scopes[0].insert(name.to_string(), symbol);
  }

  fn declare_local(&mut self, name: &str, ty: Type, slot: LocalSlot, frame: usize, pos: Pos) {
    self.bind(Symbol {
      name: name.to_string(),
      kind: SymbolKind::Local { ty, slot, frame },
      pos: Some(pos),
    });
  }

  fn declare_function(&mut self, name: &str, link_name: &str, signature: Signature, pos: Pos) {
    self.bind(Symbol {
      name: name.to_string(),
      kind: SymbolKind::Function {
        signature,
        link_name: link_name.to_string(),
      },
      pos: Some(pos),
    });
  }

  fn exists_in_current_scope(&self, name: &str) -> bool {
    self
      .scopes
      .last()
      .is_some_and(|scope| scope.contains_key(name))
  }

  fn lookup(&self, name: &str) -> Option<Symbol> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.get(name))
      .cloned()
  }

  fn resolve_external_type(&self, name: &str) -> Option<Type> {
    self.external.as_ref().and_then(|resolve| resolve(name))
  }

  fn open_scope(&mut self) {
    self.scopes.push(HashMap::new());
  }

  fn close_scope(&mut self) {
    // The universe scope is never popped.
    if self.scopes.len() > 1 {
      self.scopes.pop();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn local(table: &ScopedTable, name: &str) -> Option<LocalSlot> {
    match table.lookup(name)?.kind {
      SymbolKind::Local { slot, .. } => Some(slot),
      _ => None,
    }
  }

  #[test]
  fn inner_scope_shadows_and_then_falls_out() {
    let mut table = ScopedTable::new();
    table.open_scope();
    table.declare_local("x", Type::Int32, LocalSlot(0), 0, Pos::new(1, 1));
    table.open_scope();
    assert!(!table.exists_in_current_scope("x"));
    table.declare_local("x", Type::Double, LocalSlot(1), 0, Pos::new(2, 1));
    assert_eq!(local(&table, "x"), Some(LocalSlot(1)));
    table.close_scope();
    assert_eq!(local(&table, "x"), Some(LocalSlot(0)));
    table.close_scope();
    assert_eq!(table.lookup("x"), None);
  }

  #[test]
  fn universe_scope_survives_unbalanced_close() {
    let mut table = ScopedTable::new();
    table.bind_universe_symbol("int", Type::Int32);
    table.close_scope();
    table.close_scope();
    assert_eq!(table.depth(), 1);
    assert_eq!(
      table.lookup("int").and_then(|s| s.as_type().cloned()),
      Some(Type::Int32)
    );
  }

  #[test]
  fn external_hook_resolves_unknown_type_names() {
    let table = ScopedTable::new().with_external_types(|name| {
      (name == "vector").then(|| Type::Named(name.to_string()))
    });
    assert_eq!(
      table.resolve_external_type("vector"),
      Some(Type::Named("vector".into()))
    );
    assert_eq!(table.resolve_external_type("matrix"), None);
  }
}
