//! Code generation backend.
//!
//! The engine drives a `Backend` through an ordered protocol of calls and
//! never looks at what it produces. `Listing` is the in-tree implementation:
//! it records a stack-machine instruction list per function, checks that
//! every label is marked exactly once, and renders the result as text.

use std::fmt;

use tracing::trace;

use crate::error::{CompileResult, LabelMarkedTwiceSnafu, LabelNeverMarkedSnafu};
use crate::symbols::Signature;
use crate::ty::Type;

/// Branch target allocated before its address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Storage handle of a local variable, numbered per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSlot(pub u32);

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "L{}", self.0)
  }
}

impl fmt::Display for LocalSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "%{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
  Lt,
  Le,
  Eq,
  Ne,
  Ge,
  Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
  Add,
  Sub,
  BitOr,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
  Mul,
  Div,
  Rem,
  BitAnd,
  And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  BitNot,
  Not,
}

impl RelOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    Some(match symbol {
      "<" => RelOp::Lt,
      "<=" => RelOp::Le,
      "==" => RelOp::Eq,
      "!=" => RelOp::Ne,
      ">=" => RelOp::Ge,
      ">" => RelOp::Gt,
      _ => return None,
    })
  }
}

impl AddOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    Some(match symbol {
      "+" => AddOp::Add,
      "-" => AddOp::Sub,
      "|" => AddOp::BitOr,
      "||" => AddOp::Or,
      _ => return None,
    })
  }

  pub fn symbol(self) -> &'static str {
    match self {
      AddOp::Add => "+",
      AddOp::Sub => "-",
      AddOp::BitOr => "|",
      AddOp::Or => "||",
    }
  }
}

impl MulOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    Some(match symbol {
      "*" => MulOp::Mul,
      "/" => MulOp::Div,
      "%" => MulOp::Rem,
      "&" => MulOp::BitAnd,
      "&&" => MulOp::And,
      _ => return None,
    })
  }

  pub fn symbol(self) -> &'static str {
    match self {
      MulOp::Mul => "*",
      MulOp::Div => "/",
      MulOp::Rem => "%",
      MulOp::BitAnd => "&",
      MulOp::And => "&&",
    }
  }
}

impl UnaryOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    Some(match symbol {
      "-" => UnaryOp::Neg,
      "~" => UnaryOp::BitNot,
      "!" => UnaryOp::Not,
      _ => return None,
    })
  }
}

/// The calls the translation engine issues, in control-flow order.
///
/// Operand-producing calls push one value on an evaluation stack; operator
/// calls pop their operands and push the result.
pub trait Backend {
  /// Reserve storage for a local of the current function.
  fn allocate_local(&mut self, name: &str, ty: &Type) -> LocalSlot;
  /// A fresh label; it must be marked exactly once, before or after branches
  /// to it are emitted.
  fn allocate_label(&mut self) -> Label;
  /// Fix `label` at the current position.
  fn mark_label(&mut self, label: Label);
  fn emit_branch(&mut self, target: Label);
  /// Pop a condition and jump to `target` when it is false or zero.
  fn emit_branch_if_false(&mut self, target: Label);
  /// Return from the current function, with the stack top as the value if any.
  fn emit_return(&mut self);
  /// Compare the two topmost values; pushes a boolean.
  fn emit_relational(&mut self, op: RelOp);
  fn emit_additive(&mut self, op: AddOp);
  fn emit_multiplicative(&mut self, op: MulOp);
  fn emit_unary(&mut self, op: UnaryOp);
  /// String `+`: either operand may be a non-string, converted to text.
  fn emit_concatenation(&mut self);
  fn emit_integer_literal(&mut self, value: i32);
  fn emit_double_literal(&mut self, value: f64);
  fn emit_bool_literal(&mut self, value: bool);
  fn emit_char_literal(&mut self, value: char);
  fn emit_string_literal(&mut self, value: &str);
  /// Push the value stored in `slot`.
  fn emit_load_local(&mut self, slot: LocalSlot);
  /// Store the top of the stack into `slot`, leaving the value in place.
  fn emit_store_local(&mut self, slot: LocalSlot);
  /// Drop the top of the stack.
  fn emit_discard(&mut self);
  /// Call the function opened by `begin_function` under `link_name`; pops
  /// the argument and pushes the result.
  fn emit_call(&mut self, link_name: &str);
  /// Subsequent locals and instructions belong to `link_name` until the
  /// matching `end_function`.
  fn begin_function(&mut self, link_name: &str, signature: &Signature);
  /// Close the innermost open function.
  fn end_function(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
  Mark(Label),
  Branch(Label),
  BranchIfFalse(Label),
  Return,
  Relational(RelOp),
  Additive(AddOp),
  Multiplicative(MulOp),
  Unary(UnaryOp),
  Concat,
  LoadInt(i32),
  LoadDouble(f64),
  LoadBool(bool),
  LoadChar(char),
  LoadString(String),
  LoadLocal(LocalSlot),
  StoreLocal(LocalSlot),
  Discard,
  Call(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
  pub name: String,
  pub signature: Option<Signature>,
  pub locals: Vec<(String, Type)>,
  pub code: Vec<Instr>,
}

impl FunctionBody {
  fn new(name: &str, signature: Option<Signature>) -> Self {
    Self {
      name: name.to_string(),
      signature,
      locals: Vec::new(),
      code: Vec::new(),
    }
  }
}

/// Name of the implicit function holding top-level statements.
pub const ENTRY: &str = "main";

/// Recording backend.
#[derive(Debug)]
pub struct Listing {
  building: Vec<FunctionBody>,
  finished: Vec<FunctionBody>,
  marks: Vec<u32>,
}

impl Default for Listing {
  fn default() -> Self {
    Self::new()
  }
}

impl Listing {
  pub fn new() -> Self {
    Self {
      building: vec![FunctionBody::new(ENTRY, None)],
      finished: Vec::new(),
      marks: Vec::new(),
    }
  }

  /// Close the entry function and verify that every label was marked once.
  pub fn finish(mut self) -> CompileResult<Module> {
    for (label, &count) in self.marks.iter().enumerate() {
      let label = label as u32;
      snafu::ensure!(count > 0, LabelNeverMarkedSnafu { label });
      snafu::ensure!(count == 1, LabelMarkedTwiceSnafu { label });
    }

    // Nested bodies left open by a truncated parse are closed innermost-first.
    while let Some(body) = self.building.pop() {
      self.finished.push(body);
    }

    // Entry first, then the definitions in the order they were completed.
    let entry = self.finished.pop();
    let mut functions: Vec<_> = entry.into_iter().collect();
    functions.append(&mut self.finished);
    Ok(Module { functions })
  }

  fn current(&mut self) -> &mut FunctionBody {
    if self.building.is_empty() {
      self.building.push(FunctionBody::new(ENTRY, None));
    }
    let last = self.building.len() - 1;
    &mut self.building[last]
  }

  fn push(&mut self, instr: Instr) {
    self.current().code.push(instr);
  }
}

impl Backend for Listing {
  fn allocate_local(&mut self, name: &str, ty: &Type) -> LocalSlot {
    let body = self.current();
    body.locals.push((name.to_string(), ty.clone()));
    LocalSlot(body.locals.len() as u32 - 1)
  }

  fn allocate_label(&mut self) -> Label {
    self.marks.push(0);
    Label(self.marks.len() as u32 - 1)
  }

  fn mark_label(&mut self, label: Label) {
    trace!(%label, "mark");
    if let Some(count) = self.marks.get_mut(label.0 as usize) {
      *count += 1;
    }
    self.push(Instr::Mark(label));
  }

  fn emit_branch(&mut self, target: Label) {
    self.push(Instr::Branch(target));
  }

  fn emit_branch_if_false(&mut self, target: Label) {
    self.push(Instr::BranchIfFalse(target));
  }

  fn emit_return(&mut self) {
    self.push(Instr::Return);
  }

  fn emit_relational(&mut self, op: RelOp) {
    self.push(Instr::Relational(op));
  }

  fn emit_additive(&mut self, op: AddOp) {
    self.push(Instr::Additive(op));
  }

  fn emit_multiplicative(&mut self, op: MulOp) {
    self.push(Instr::Multiplicative(op));
  }

  fn emit_unary(&mut self, op: UnaryOp) {
    self.push(Instr::Unary(op));
  }

  fn emit_concatenation(&mut self) {
    self.push(Instr::Concat);
  }

  fn emit_integer_literal(&mut self, value: i32) {
    self.push(Instr::LoadInt(value));
  }

  fn emit_double_literal(&mut self, value: f64) {
    self.push(Instr::LoadDouble(value));
  }

  fn emit_bool_literal(&mut self, value: bool) {
    self.push(Instr::LoadBool(value));
  }

  fn emit_char_literal(&mut self, value: char) {
    self.push(Instr::LoadChar(value));
  }

  fn emit_string_literal(&mut self, value: &str) {
    self.push(Instr::LoadString(value.to_string()));
  }

  fn emit_load_local(&mut self, slot: LocalSlot) {
    self.push(Instr::LoadLocal(slot));
  }

  fn emit_store_local(&mut self, slot: LocalSlot) {
    self.push(Instr::StoreLocal(slot));
  }

  fn emit_discard(&mut self) {
    self.push(Instr::Discard);
  }

  fn emit_call(&mut self, name: &str) {
    self.push(Instr::Call(name.to_string()));
  }

  fn begin_function(&mut self, name: &str, signature: &Signature) {
    trace!(name, "begin function");
    self
      .building
      .push(FunctionBody::new(name, Some(signature.clone())));
  }

  fn end_function(&mut self) {
    // The entry body stays open until `finish`.
    if self.building.len() > 1
      && let Some(body) = self.building.pop()
    {
      trace!(name = %body.name, "end function");
      self.finished.push(body);
    }
  }
}

/// Finished output: the entry function followed by every definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
  pub functions: Vec<FunctionBody>,
}

impl Module {
  pub fn function(&self, name: &str) -> Option<&FunctionBody> {
    self.functions.iter().find(|body| body.name == name)
  }

  pub fn entry(&self) -> Option<&FunctionBody> {
    self.function(ENTRY)
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for body in &self.functions {
      match &body.signature {
        Some(signature) => writeln!(
          f,
          "{}({}) -> {}:",
          body.name, signature.param, signature.ret
        )?,
        None => writeln!(f, "{}:", body.name)?,
      }
      for (slot, (name, ty)) in body.locals.iter().enumerate() {
        writeln!(f, "    .local %{slot} {name}: {ty}")?;
      }
      for instr in &body.code {
        match instr {
          Instr::Mark(label) => writeln!(f, "{label}:")?,
          other => writeln!(f, "    {other}")?,
        }
      }
    }
    Ok(())
  }
}

impl fmt::Display for Instr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Instr::Mark(label) => write!(f, "{label}:"),
      Instr::Branch(label) => write!(f, "br {label}"),
      Instr::BranchIfFalse(label) => write!(f, "brfalse {label}"),
      Instr::Return => f.write_str("ret"),
      Instr::Relational(op) => f.write_str(match op {
        RelOp::Lt => "clt",
        RelOp::Le => "cle",
        RelOp::Eq => "ceq",
        RelOp::Ne => "cne",
        RelOp::Ge => "cge",
        RelOp::Gt => "cgt",
      }),
      Instr::Additive(op) => f.write_str(match op {
        AddOp::Add => "add",
        AddOp::Sub => "sub",
        AddOp::BitOr => "or",
        AddOp::Or => "lor",
      }),
      Instr::Multiplicative(op) => f.write_str(match op {
        MulOp::Mul => "mul",
        MulOp::Div => "div",
        MulOp::Rem => "rem",
        MulOp::BitAnd => "and",
        MulOp::And => "land",
      }),
      Instr::Unary(op) => f.write_str(match op {
        UnaryOp::Neg => "neg",
        UnaryOp::BitNot => "not",
        UnaryOp::Not => "lnot",
      }),
      Instr::Concat => f.write_str("concat"),
      Instr::LoadInt(value) => write!(f, "ldc.i4 {value}"),
      Instr::LoadDouble(value) => write!(f, "ldc.r8 {value:?}"),
      Instr::LoadBool(value) => write!(f, "ldc.bool {value}"),
      Instr::LoadChar(value) => write!(f, "ldc.char {value:?}"),
      Instr::LoadString(value) => write!(f, "ldstr {value:?}"),
      Instr::LoadLocal(slot) => write!(f, "ldloc {slot}"),
      Instr::StoreLocal(slot) => write!(f, "stloc {slot}"),
      Instr::Discard => f.write_str("pop"),
      Instr::Call(name) => write!(f, "call {name}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn locals_are_numbered_per_function() {
    let mut listing = Listing::new();
    assert_eq!(listing.allocate_local("a", &Type::Int32), LocalSlot(0));
    let signature = Signature {
      param: Type::Int32,
      ret: Type::Int32,
    };
    listing.begin_function("f", &signature);
    assert_eq!(listing.allocate_local("p", &Type::Int32), LocalSlot(0));
    listing.end_function();
    assert_eq!(listing.allocate_local("b", &Type::Int32), LocalSlot(1));

    let module = listing.finish().unwrap();
    assert_eq!(module.functions[0].name, ENTRY);
    assert_eq!(module.functions[1].name, "f");
    assert_eq!(module.entry().unwrap().locals.len(), 2);
  }

  #[test]
  fn finish_rejects_unmarked_and_doubly_marked_labels() {
    let mut listing = Listing::new();
    listing.allocate_label();
    assert!(listing.finish().is_err());

    let mut listing = Listing::new();
    let label = listing.allocate_label();
    listing.mark_label(label);
    listing.mark_label(label);
    let err = listing.finish().unwrap_err();
    assert!(err.to_string().contains("more than once"));
  }

  #[test]
  fn branches_may_reference_a_label_before_it_is_marked() {
    let mut listing = Listing::new();
    let label = listing.allocate_label();
    listing.emit_bool_literal(true);
    listing.emit_branch_if_false(label);
    listing.emit_integer_literal(1);
    listing.emit_discard();
    listing.mark_label(label);
    let module = listing.finish().unwrap();
    assert_eq!(
      module.to_string(),
      "main:\n    ldc.bool true\n    brfalse L0\n    ldc.i4 1\n    pop\nL0:\n"
    );
  }

  #[test]
  fn end_function_never_closes_the_entry() {
    let mut listing = Listing::new();
    listing.end_function();
    listing.emit_return();
    let module = listing.finish().unwrap();
    assert_eq!(module.functions.len(), 1);
    assert_eq!(module.entry().unwrap().code, vec![Instr::Return]);
  }
}
