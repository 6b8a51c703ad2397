//! Recursive-descent translation engine.
//!
//! One function per production, LL(1): every decision is taken on the
//! current token alone (plus the registry, to tell type names apart from
//! variables). Semantic checks and backend calls are interleaved with
//! recognition, so there is no tree; code is emitted as soon as each
//! construct is understood.
//!
//! A failed production reports a diagnostic, resynchronizes the stream at
//! the next `;` and returns `Err(Recovered)`. `?` carries that up to the
//! nearest statement loop, which simply moves on to the next statement.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::codegen::{AddOp, Backend, Label, LocalSlot, MulOp, RelOp, UnaryOp};
use crate::config::ParserConfig;
use crate::diag::{Diagnostics, Severity};
use crate::symbols::{Registry, Signature, SymbolKind};
use crate::tokenizer::{Pos, Token, TokenKind, TokenSource};
use crate::ty::{self, Combined, Type};

/// The failure has already been reported and the stream resynchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovered;

type Production<T> = Result<T, Recovered>;

/// Targets of the enclosing loops, innermost last. Both stacks always have
/// the same height.
#[derive(Debug, Default)]
struct LoopStack {
  continue_targets: Vec<Label>,
  break_targets: Vec<Label>,
}

impl LoopStack {
  fn depth(&self) -> usize {
    self.break_targets.len()
  }
}

/// Result of a primary expression. `place` is set when the value was loaded
/// straight from a variable, which is what `++`/`--` need to store back.
struct Operand {
  ty: Type,
  place: Option<LocalSlot>,
}

impl Operand {
  fn value(ty: Type) -> Self {
    Self { ty, place: None }
  }
}

#[derive(Debug, Clone, Copy)]
enum Assign {
  Plain,
  Additive(AddOp),
  Multiplicative(MulOp),
}

fn assign_op(symbol: &str) -> Option<Assign> {
  Some(match symbol {
    "=" => Assign::Plain,
    "+=" => Assign::Additive(AddOp::Add),
    "-=" => Assign::Additive(AddOp::Sub),
    "*=" => Assign::Multiplicative(MulOp::Mul),
    "/=" => Assign::Multiplicative(MulOp::Div),
    "%=" => Assign::Multiplicative(MulOp::Rem),
    _ => return None,
  })
}

fn step_op(symbol: &str) -> Option<AddOp> {
  match symbol {
    "++" => Some(AddOp::Add),
    "--" => Some(AddOp::Sub),
    _ => None,
  }
}

/// Single-pass translator: recognizes the grammar and, in the same walk,
/// type-checks through the registry and emits code through the backend.
pub struct Parser<'a> {
  tokens: &'a mut dyn TokenSource,
  registry: &'a mut dyn Registry,
  backend: &'a mut dyn Backend,
  diag: &'a mut dyn Diagnostics,
  config: ParserConfig,
  token: Token,
  loops: LoopStack,
  /// Declared return types of the function definitions being parsed. Its
  /// length is the frame that new locals belong to.
  returns: Vec<Type>,
  /// How many functions have been defined under each source name.
  definitions: HashMap<String, usize>,
}

impl<'a> Parser<'a> {
  /// Pull the first token; nothing else is consumed until `parse`.
  pub fn new(
    tokens: &'a mut dyn TokenSource,
    registry: &'a mut dyn Registry,
    backend: &'a mut dyn Backend,
    diag: &'a mut dyn Diagnostics,
    config: ParserConfig,
  ) -> Self {
    let token = tokens.next_token();
    Self {
      tokens,
      registry,
      backend,
      diag,
      config,
      token,
      loops: LoopStack::default(),
      returns: Vec::new(),
      definitions: HashMap::new(),
    }
  }

  /// Translate the whole input. Accepted when no error was counted and the
  /// stream ended exactly at end-of-input.
  pub fn parse(&mut self) -> bool {
    for (name, ty) in Type::primitives() {
      self.registry.bind_universe_symbol(name, ty);
    }
    let accepted = self.program() && self.token.is_eof();
    debug!(
      accepted,
      errors = self.diag.error_count(),
      "translation finished"
    );
    accepted
  }

  // ---------------------------------------------------------------------------
  // Token handling

  fn advance(&mut self) {
    self.token = self.tokens.next_token();
  }

  fn at(&self, symbol: &str) -> bool {
    self.token.is_symbol(symbol)
  }

  /// Consume the current token if it is the given special symbol.
  fn equal(&mut self, symbol: &str) -> bool {
    if self.at(symbol) {
      self.advance();
      return true;
    }
    false
  }

  fn equal_keyword(&mut self, keyword: &str) -> bool {
    if self.token.is_keyword(keyword) {
      self.advance();
      return true;
    }
    false
  }

  /// Require a bracket or terminator. Failures use the configured
  /// structural severity.
  fn skip(&mut self, symbol: &str) -> Production<()> {
    if self.equal(symbol) {
      Ok(())
    } else {
      let message = format!("expected \"{symbol}\", but got \"{}\"", self.token.kind);
      Err(self.fail(self.config.structural_severity, self.token.pos, message))
    }
  }

  fn ident(&mut self) -> Production<(String, Pos)> {
    if let TokenKind::Ident(name) = &self.token.kind {
      let found = (name.clone(), self.token.pos);
      self.advance();
      return Ok(found);
    }
    let message = format!("expected an identifier, but got \"{}\"", self.token.kind);
    Err(self.syntax_error(message))
  }

  /// Consume the current token if `classify` maps its symbol to an operator.
  fn operator<T>(&mut self, classify: fn(&str) -> Option<T>) -> Option<T> {
    let op = match self.token.kind {
      TokenKind::Symbol(symbol) => classify(symbol),
      _ => None,
    }?;
    self.advance();
    Some(op)
  }

  /// The type named by the current token, if it names one.
  fn peek_type(&self) -> Option<Type> {
    match &self.token.kind {
      TokenKind::Keyword(word) => self.registry.lookup(word)?.as_type().cloned(),
      TokenKind::Ident(name) => match self.registry.lookup(name) {
        Some(symbol) => symbol.as_type().cloned(),
        None => self.registry.resolve_external_type(name),
      },
      _ => None,
    }
  }

  fn starts_expression(&self) -> bool {
    match &self.token.kind {
      TokenKind::Ident(_)
      | TokenKind::Int(_)
      | TokenKind::Double(_)
      | TokenKind::Bool(_)
      | TokenKind::Char(_)
      | TokenKind::Str(_) => true,
      TokenKind::Symbol(symbol) => matches!(
        *symbol,
        "(" | "+" | "-" | "~" | "!" | "++" | "--" | "*" | "&"
      ),
      _ => false,
    }
  }

  // ---------------------------------------------------------------------------
  // Diagnostics and recovery

  fn fail(&mut self, severity: Severity, pos: Pos, message: String) -> Recovered {
    self.diag.report(severity, pos, message);
    self.synchronize();
    Recovered
  }

  fn syntax_error(&mut self, message: String) -> Recovered {
    self.fail(Severity::Error, self.token.pos, message)
  }

  fn semantic_error(&mut self, pos: Pos, message: String) -> Recovered {
    self.fail(Severity::Error, pos, message)
  }

  fn mismatch(&mut self, symbol: &str, lhs: &Type, rhs: &Type, pos: Pos) -> Recovered {
    self.semantic_error(
      pos,
      format!("operator '{symbol}' cannot be applied to '{lhs}' and '{rhs}'"),
    )
  }

  /// Discard tokens up to and including the next `;`, stopping early at
  /// end-of-input.
  fn synchronize(&mut self) {
    let mut skipped = 0usize;
    while !self.token.is_eof() {
      let terminator = self.at(";");
      self.advance();
      skipped += 1;
      if terminator {
        break;
      }
    }
    trace!(skipped, at = %self.token.pos, "resynchronized");
  }

  // ---------------------------------------------------------------------------
  // Scoped state. Each helper restores what it pushed whatever `f` returns.

  fn in_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
    self.registry.open_scope();
    let result = f(self);
    self.registry.close_scope();
    result
  }

  fn in_loop<T>(&mut self, continue_to: Label, break_to: Label, f: impl FnOnce(&mut Self) -> T) -> T {
    self.loops.continue_targets.push(continue_to);
    self.loops.break_targets.push(break_to);
    let depth = self.loops.depth();
    let result = f(self);
    debug_assert_eq!(self.loops.depth(), depth);
    self.loops.continue_targets.pop();
    self.loops.break_targets.pop();
    result
  }

  /// Loop targets do not cross a function boundary.
  fn in_function<T>(&mut self, ret: Type, f: impl FnOnce(&mut Self) -> T) -> T {
    let outer = std::mem::take(&mut self.loops);
    self.returns.push(ret);
    let result = f(self);
    self.returns.pop();
    self.loops = outer;
    result
  }

  // ---------------------------------------------------------------------------
  // Statements

  /// `Program = { Statement } .`
  fn program(&mut self) -> bool {
    while !self.token.is_eof() {
      let _ = self.statement();
    }
    self.diag.error_count() == 0
  }

  /// `Statement = CompoundSt | IfSt | WhileSt | StopSt | [ Expression ] ';' .`
  fn statement(&mut self) -> Production<()> {
    match &self.token.kind {
      TokenKind::Symbol("{") => self.compound(),
      TokenKind::Keyword("if") => self.if_statement(),
      TokenKind::Keyword("while") => self.while_statement(),
      TokenKind::Keyword("break" | "continue" | "return") => self.stop_statement(),
      TokenKind::Symbol(";") => {
        self.advance();
        Ok(())
      }
      _ if self.peek_type().is_some() => {
        Err(self.syntax_error("declarations must precede statements in a block".to_string()))
      }
      _ if self.starts_expression() => {
        self.expression()?;
        self.backend.emit_discard();
        self.skip(";")
      }
      _ => {
        let message = format!("expected a statement, but got \"{}\"", self.token.kind);
        Err(self.syntax_error(message))
      }
    }
  }

  /// `CompoundSt = '{' { Declaration } { Statement } '}' .`
  fn compound(&mut self) -> Production<()> {
    self.skip("{")?;
    self.in_scope(|p| {
      while p.peek_type().is_some() {
        let _ = p.declaration();
      }
      while !p.at("}") && !p.token.is_eof() {
        let _ = p.statement();
      }
      p.skip("}")
    })
  }

  /// `Declaration = VarDef | FuncDef .`
  ///
  /// `VarDef = TypeIdent Identifier ';'` and
  /// `FuncDef = TypeIdent Identifier '(' TypeIdent Identifier ')' CompoundSt`
  /// share everything up to the `(`.
  fn declaration(&mut self) -> Production<()> {
    let ty = self.type_ident()?;
    let (name, pos) = self.ident()?;
    self.check_fresh(&name, pos)?;
    if self.equal("(") {
      return self.function_definition(name, pos, ty);
    }
    self.bind_local(&name, ty, pos);
    self.skip(";")
  }

  fn type_ident(&mut self) -> Production<Type> {
    match self.peek_type() {
      Some(ty) => {
        self.advance();
        Ok(ty)
      }
      None => {
        let message = format!("expected a type name, but got \"{}\"", self.token.kind);
        Err(self.syntax_error(message))
      }
    }
  }

  fn check_fresh(&mut self, name: &str, pos: Pos) -> Production<()> {
    if !self.registry.exists_in_current_scope(name) {
      return Ok(());
    }
    let previous = self.registry.lookup(name).and_then(|symbol| symbol.pos);
    self
      .diag
      .error(pos, format!("'{name}' is already declared in this scope"));
    if let Some(previous) = previous {
      self
        .diag
        .note(previous, format!("previous declaration of '{name}' is here"));
    }
    self.synchronize();
    Err(Recovered)
  }

  fn bind_local(&mut self, name: &str, ty: Type, pos: Pos) -> LocalSlot {
    let slot = self.backend.allocate_local(name, &ty);
    let frame = self.returns.len();
    self.registry.declare_local(name, ty, slot, frame, pos);
    slot
  }

  /// Backend name for a new definition of `name`: the name itself the first
  /// time, then `name#1`, `name#2`, ...
  fn link_name(&mut self, name: &str) -> String {
    let count = self.definitions.entry(name.to_string()).or_default();
    let link_name = match *count {
      0 => name.to_string(),
      n => format!("{name}#{n}"),
    };
    *count += 1;
    link_name
  }

  /// Everything after `TypeIdent Identifier '('`.
  fn function_definition(&mut self, name: String, pos: Pos, ret: Type) -> Production<()> {
    let param_ty = self.type_ident()?;
    let (param, param_pos) = self.ident()?;
    self.skip(")")?;

    let signature = Signature {
      param: param_ty.clone(),
      ret: ret.clone(),
    };
    let link_name = self.link_name(&name);
    self
      .registry
      .declare_function(&name, &link_name, signature.clone(), pos);

    self.backend.begin_function(&link_name, &signature);
    let body = self.in_scope(|p| {
      p.in_function(ret, |p| {
        p.bind_local(&param, param_ty, param_pos);
        p.compound()
      })
    });
    self.backend.end_function();
    body
  }

  /// `IfSt = 'if' '(' Expression ')' Statement [ 'else' Statement ] .`
  fn if_statement(&mut self) -> Production<()> {
    self.advance();
    self.condition()?;

    let else_label = self.backend.allocate_label();
    self.backend.emit_branch_if_false(else_label);
    let _ = self.statement();

    if self.equal_keyword("else") {
      let end_label = self.backend.allocate_label();
      self.backend.emit_branch(end_label);
      self.backend.mark_label(else_label);
      let _ = self.statement();
      self.backend.mark_label(end_label);
    } else {
      self.backend.mark_label(else_label);
    }
    Ok(())
  }

  /// `WhileSt = 'while' '(' Expression ')' Statement .`
  fn while_statement(&mut self) -> Production<()> {
    self.advance();
    let continue_label = self.backend.allocate_label();
    let break_label = self.backend.allocate_label();

    let outcome = self.in_loop(continue_label, break_label, |p| {
      p.backend.mark_label(continue_label);
      p.condition()?;
      p.backend.emit_branch_if_false(break_label);
      let _ = p.statement();
      p.backend.emit_branch(continue_label);
      Ok(())
    });

    // Marked on the error path too, so the label never dangles.
    self.backend.mark_label(break_label);
    outcome
  }

  /// `'(' Expression ')'` guarding an `if` or `while`.
  fn condition(&mut self) -> Production<()> {
    self.skip("(")?;
    let pos = self.token.pos;
    let ty = self.expression()?;
    if !matches!(ty, Type::Boolean | Type::Int32) {
      return Err(self.semantic_error(
        pos,
        format!("condition must be of type 'bool' or 'int', found '{ty}'"),
      ));
    }
    self.skip(")")
  }

  /// `StopSt = 'break' ';' | 'continue' ';' | 'return' [ Expression ] ';' .`
  fn stop_statement(&mut self) -> Production<()> {
    let pos = self.token.pos;
    let (keyword, target) = match &self.token.kind {
      TokenKind::Keyword("break") => ("break", self.loops.break_targets.last().copied()),
      TokenKind::Keyword("continue") => ("continue", self.loops.continue_targets.last().copied()),
      _ => return self.return_statement(),
    };
    self.advance();

    let Some(target) = target else {
      return Err(self.semantic_error(pos, format!("'{keyword}' outside of a loop")));
    };
    self.skip(";")?;
    self.backend.emit_branch(target);
    Ok(())
  }

  fn return_statement(&mut self) -> Production<()> {
    let keyword_pos = self.token.pos;
    self.advance();
    let expected = self.returns.last().cloned();
    if self.starts_expression() {
      let pos = self.token.pos;
      let ty = self.expression()?;
      if let Some(expected) = expected {
        self.coerce(&expected, &ty, pos, "return value")?;
      }
    } else if let Some(expected) = expected {
      return Err(self.semantic_error(
        keyword_pos,
        format!("'return' needs a value of type '{expected}'"),
      ));
    }
    self.backend.emit_return();
    self.skip(";")
  }

  // ---------------------------------------------------------------------------
  // Expressions

  /// `Expression = AdditiveExpr [ RelOp AdditiveExpr ] .`
  fn expression(&mut self) -> Production<Type> {
    let lhs = self.additive()?;
    let pos = self.token.pos;
    let Some(op) = self.operator(RelOp::from_symbol) else {
      return Ok(lhs);
    };
    let rhs = self.additive()?;
    if lhs != rhs {
      return Err(self.semantic_error(
        pos,
        format!("cannot compare '{lhs}' with '{rhs}'"),
      ));
    }
    self.backend.emit_relational(op);
    Ok(Type::Boolean)
  }

  /// `AdditiveExpr = [ Sign ] MultiplicativeExpr { AddOp MultiplicativeExpr } .`
  fn additive(&mut self) -> Production<Type> {
    let negate = if self.equal("-") {
      true
    } else {
      self.equal("+");
      false
    };

    let mut ty = self.multiplicative()?;
    if negate {
      self.backend.emit_unary(UnaryOp::Neg);
    }

    loop {
      let pos = self.token.pos;
      let Some(op) = self.operator(AddOp::from_symbol) else {
        return Ok(ty);
      };
      let rhs = self.multiplicative()?;
      ty = self.additive_rule(op, ty, rhs, pos)?;
    }
  }

  fn additive_rule(&mut self, op: AddOp, lhs: Type, rhs: Type, pos: Pos) -> Production<Type> {
    if op == AddOp::Or {
      if lhs.is_boolean() && rhs.is_boolean() {
        self.backend.emit_additive(op);
        return Ok(Type::Boolean);
      }
      return Err(self.mismatch(op.symbol(), &lhs, &rhs, pos));
    }

    if lhs.is_string() || rhs.is_string() {
      if op == AddOp::Add {
        self.backend.emit_concatenation();
      } else {
        self.backend.emit_additive(op);
      }
      return Ok(Type::String);
    }

    let ty = self.promote(op.symbol(), &lhs, &rhs, pos)?;
    self.backend.emit_additive(op);
    Ok(ty)
  }

  /// `MultiplicativeExpr = SimpleExpr { MulOp SimpleExpr } .`
  fn multiplicative(&mut self) -> Production<Type> {
    let mut ty = self.simple()?;
    loop {
      let pos = self.token.pos;
      let Some(op) = self.operator(MulOp::from_symbol) else {
        return Ok(ty);
      };
      let rhs = self.simple()?;
      ty = self.multiplicative_rule(op, ty, rhs, pos)?;
    }
  }

  fn multiplicative_rule(&mut self, op: MulOp, lhs: Type, rhs: Type, pos: Pos) -> Production<Type> {
    if op == MulOp::And {
      if lhs.is_boolean() && rhs.is_boolean() {
        self.backend.emit_multiplicative(op);
        return Ok(Type::Boolean);
      }
      return Err(self.mismatch(op.symbol(), &lhs, &rhs, pos));
    }

    let ty = self.promote(op.symbol(), &lhs, &rhs, pos)?;
    self.backend.emit_multiplicative(op);
    Ok(ty)
  }

  /// Int32/Double promotion; widening is allowed but warned about.
  fn promote(&mut self, symbol: &str, lhs: &Type, rhs: &Type, pos: Pos) -> Production<Type> {
    match ty::numeric(lhs, rhs) {
      Some(Combined::Exact(ty)) => Ok(ty),
      Some(Combined::Widened(ty)) => {
        self.diag.warning(
          pos,
          format!(
            "operator '{symbol}' widens '{lhs}' and '{rhs}' to '{ty}'; explicit conversion expected"
          ),
        );
        Ok(ty)
      }
      None => Err(self.mismatch(symbol, lhs, rhs, pos)),
    }
  }

  fn coerce(&mut self, to: &Type, from: &Type, pos: Pos, context: &str) -> Production<()> {
    match ty::assignable(to, from) {
      Some(Combined::Exact(_)) => Ok(()),
      Some(Combined::Widened(_)) => {
        self.diag.warning(
          pos,
          format!("{context} widens '{from}' to '{to}'; explicit conversion expected"),
        );
        Ok(())
      }
      None => Err(self.semantic_error(
        pos,
        format!("{context} has type '{from}', expected '{to}'"),
      )),
    }
  }

  /// `SimpleExpr = IncDecOp PrimaryExpr | UnaryOp PrimaryExpr | PrimaryExpr [ IncDecOp ] .`
  fn simple(&mut self) -> Production<Type> {
    let pos = self.token.pos;
    if let Some(step) = self.operator(step_op) {
      let operand = self.primary()?;
      let slot = self.step_target(&operand, pos)?;
      self.emit_step(step, slot, &operand.ty);
      return Ok(operand.ty);
    }

    if let Some(op) = self.operator(UnaryOp::from_symbol) {
      if op == UnaryOp::Neg {
        return self.signed(true).map(|operand| operand.ty);
      }
      let operand = self.primary()?;
      self.backend.emit_unary(op);
      return Ok(operand.ty);
    }

    let operand = self.primary()?;
    let pos = self.token.pos;
    if let Some(step) = self.operator(step_op) {
      let slot = self.step_target(&operand, pos)?;
      // The loaded old value stays underneath as the expression's result.
      self.backend.emit_load_local(slot);
      self.emit_step(step, slot, &operand.ty);
      self.backend.emit_discard();
    }
    Ok(operand.ty)
  }

  fn step_target(&mut self, operand: &Operand, pos: Pos) -> Production<LocalSlot> {
    match operand.place {
      Some(slot) if operand.ty.is_numeric() => Ok(slot),
      _ => Err(self.semantic_error(
        pos,
        format!(
          "increment and decrement need a numeric variable, found '{}'",
          operand.ty
        ),
      )),
    }
  }

  /// Load one, add or subtract, store back. Leaves the new value.
  fn emit_step(&mut self, op: AddOp, slot: LocalSlot, ty: &Type) {
    match ty {
      Type::Double => self.backend.emit_double_literal(1.0),
      _ => self.backend.emit_integer_literal(1),
    }
    self.backend.emit_additive(op);
    self.backend.emit_store_local(slot);
  }

  /// `PrimaryExpr = Constant | Variable | Identifier [ AssignOp Expression ]
  ///              | '*' Identifier | '&' Identifier | '(' Expression ')' .`
  fn primary(&mut self) -> Production<Operand> {
    let pos = self.token.pos;
    match self.token.kind.clone() {
      TokenKind::Symbol("(") => {
        self.advance();
        let ty = self.expression()?;
        self.skip(")")?;
        Ok(Operand::value(ty))
      }
      TokenKind::Symbol(symbol @ ("*" | "&")) => {
        self.advance();
        let (name, _) = self.ident()?;
        Err(self.semantic_error(
          pos,
          format!("'{symbol}{name}': pointer operations are not supported"),
        ))
      }
      TokenKind::Symbol(sign @ ("+" | "-")) => {
        self.advance();
        self.signed(sign == "-")
      }
      TokenKind::Ident(name) => {
        self.advance();
        self.named(&name, pos)
      }
      _ => self.constant(false).map(Operand::value),
    }
  }

  /// The operand after a sign. Numeric literals absorb the sign; anything
  /// else is negated after it is loaded.
  fn signed(&mut self, negative: bool) -> Production<Operand> {
    if matches!(self.token.kind, TokenKind::Int(_) | TokenKind::Double(_)) {
      return self.constant(negative).map(Operand::value);
    }
    let operand = self.primary()?;
    if !negative {
      return Ok(operand);
    }
    self.backend.emit_unary(UnaryOp::Neg);
    Ok(Operand::value(operand.ty))
  }

  /// `Constant = [ Sign ] ( NumberLiteral | StringLiteral )`, plus the
  /// boolean and character literals.
  fn constant(&mut self, negative: bool) -> Production<Type> {
    let ty = match self.token.kind.clone() {
      TokenKind::Int(value) => {
        let value = if negative { value.wrapping_neg() } else { value };
        self.backend.emit_integer_literal(value);
        Type::Int32
      }
      TokenKind::Double(value) => {
        self
          .backend
          .emit_double_literal(if negative { -value } else { value });
        Type::Double
      }
      TokenKind::Bool(value) if !negative => {
        self.backend.emit_bool_literal(value);
        Type::Boolean
      }
      TokenKind::Char(value) if !negative => {
        self.backend.emit_char_literal(value);
        Type::Char
      }
      TokenKind::Str(value) if !negative => {
        self.backend.emit_string_literal(&value);
        Type::String
      }
      other => {
        let message = format!("expected an expression, but got \"{other}\"");
        return Err(self.syntax_error(message));
      }
    };
    self.advance();
    Ok(ty)
  }

  /// An identifier in expression position: variable load, assignment or call.
  fn named(&mut self, name: &str, pos: Pos) -> Production<Operand> {
    let Some(symbol) = self.registry.lookup(name) else {
      return Err(self.semantic_error(pos, format!("'{name}' is not declared")));
    };

    match symbol.kind {
      // Slots are numbered per function; another frame's slot is meaningless here.
      SymbolKind::Local { frame, .. } if frame != self.returns.len() => {
        Err(self.semantic_error(pos, format!("'{name}' belongs to an enclosing function")))
      }
      SymbolKind::Local { ty, slot, .. } => {
        let op_pos = self.token.pos;
        if let Some(op) = self.operator(assign_op) {
          return self.assignment(op, slot, ty, op_pos).map(Operand::value);
        }
        self.backend.emit_load_local(slot);
        Ok(Operand {
          ty,
          place: Some(slot),
        })
      }
      SymbolKind::Function {
        signature,
        link_name,
      } => self
        .call(name, &link_name, signature, pos)
        .map(Operand::value),
      SymbolKind::Type(_) => Err(self.semantic_error(
        pos,
        format!("type '{name}' cannot be used as a value"),
      )),
    }
  }

  /// `Identifier AssignOp Expression`, the identifier already consumed.
  fn assignment(&mut self, op: Assign, slot: LocalSlot, ty: Type, pos: Pos) -> Production<Type> {
    let value_pos = self.token.pos;
    let value = match op {
      Assign::Plain => self.expression()?,
      Assign::Additive(op) => {
        self.backend.emit_load_local(slot);
        let rhs = self.expression()?;
        self.additive_rule(op, ty.clone(), rhs, pos)?
      }
      Assign::Multiplicative(op) => {
        self.backend.emit_load_local(slot);
        let rhs = self.expression()?;
        self.multiplicative_rule(op, ty.clone(), rhs, pos)?
      }
    };
    self.coerce(&ty, &value, value_pos, "assignment")?;
    self.backend.emit_store_local(slot);
    Ok(ty)
  }

  /// `FuncIdent '(' [ Expression ] ')'`, the identifier already consumed.
  fn call(&mut self, name: &str, link_name: &str, signature: Signature, pos: Pos) -> Production<Type> {
    if !self.equal("(") {
      return Err(self.semantic_error(
        pos,
        format!("function '{name}' can only be called"),
      ));
    }
    let arg_pos = self.token.pos;
    if !self.starts_expression() {
      return Err(self.semantic_error(
        arg_pos,
        format!("'{name}' expects one argument of type '{}'", signature.param),
      ));
    }
    let arg = self.expression()?;
    self.coerce(&signature.param, &arg, arg_pos, "argument")?;
    self.skip(")")?;
    self.backend.emit_call(link_name);
    Ok(signature.ret)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codegen::{Instr, Listing, Module};
  use crate::diag::DiagnosticBag;
  use crate::symbols::ScopedTable;
  use crate::tokenizer::{TokenStream, tokenize};

  struct Run {
    accepted: bool,
    module: Module,
    diagnostics: DiagnosticBag,
    loop_depth: usize,
    scope_depth: usize,
  }

  fn run_with(source: &str, config: ParserConfig, mut registry: ScopedTable) -> Run {
    let mut stream = TokenStream::new(tokenize(source).unwrap());
    let mut listing = Listing::new();
    let mut diagnostics = DiagnosticBag::new();
    let (accepted, loop_depth) = {
      let mut parser = Parser::new(
        &mut stream,
        &mut registry,
        &mut listing,
        &mut diagnostics,
        config,
      );
      let accepted = parser.parse();
      (accepted, parser.loops.depth())
    };
    Run {
      accepted,
      module: listing.finish().unwrap(),
      diagnostics,
      loop_depth,
      scope_depth: registry.depth(),
    }
  }

  fn run(source: &str) -> Run {
    run_with(source, ParserConfig::default(), ScopedTable::new())
  }

  fn errors(run: &Run) -> Vec<String> {
    run
      .diagnostics
      .with_severity(Severity::Error)
      .map(|d| d.message.clone())
      .collect()
  }

  fn entry(run: &Run) -> &[Instr] {
    &run.module.entry().unwrap().code
  }

  #[test]
  fn loop_stack_is_balanced_after_errors_inside_nested_loops() {
    let result = run(
      "{ int i; while (i < 3) { while (true) { i = \"x\"; break; } continue; } }",
    );
    assert_eq!(result.loop_depth, 0);
    assert_eq!(result.scope_depth, 1);
    assert_eq!(errors(&result).len(), 1);
  }

  #[test]
  fn break_and_continue_outside_a_loop_are_reported() {
    let result = run("break; continue;");
    assert!(!result.accepted);
    assert_eq!(
      errors(&result),
      vec!["'break' outside of a loop", "'continue' outside of a loop"]
    );
    assert!(entry(&result).is_empty());
  }

  #[test]
  fn break_targets_the_innermost_loop() {
    let result = run("while (true) { while (false) break; continue; }");
    assert!(result.accepted);
    // L0/L1 outer continue/break, L2/L3 inner.
    let code = entry(&result);
    assert!(code.contains(&Instr::Branch(Label(3))));
    assert!(code.contains(&Instr::Branch(Label(0))));
    assert!(!code.contains(&Instr::Branch(Label(1))));
  }

  #[test]
  fn loop_context_does_not_leak_into_function_bodies() {
    let result = run("while (true) { int f(int a) { break; } }");
    assert_eq!(errors(&result), vec!["'break' outside of a loop"]);
    assert_eq!(result.loop_depth, 0);
  }

  #[test]
  fn function_body_cannot_read_the_enclosing_frame() {
    let result = run("{ int x; int f(int a) { return x; } }");
    assert_eq!(errors(&result), vec!["'x' belongs to an enclosing function"]);
    let f = result.module.function("f").unwrap();
    assert!(!f.code.contains(&Instr::LoadLocal(LocalSlot(0))));
  }

  #[test]
  fn bare_return_in_a_function_needs_a_value() {
    let result = run("{ double f(int a) { return; } }");
    assert_eq!(
      errors(&result),
      vec!["'return' needs a value of type 'double'"]
    );

    assert!(run("return;").accepted);
  }

  #[test]
  fn declaration_after_statement_is_a_syntax_error() {
    let result = run("{ int x; x = 1; int y; }");
    assert_eq!(
      errors(&result),
      vec!["declarations must precede statements in a block"]
    );
  }

  #[test]
  fn redeclaration_notes_the_previous_declaration() {
    let result = run("{ int x;\n  int x; }");
    let notes: Vec<_> = result.diagnostics.with_severity(Severity::Note).collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].pos, Pos::new(1, 7));
    assert_eq!(errors(&result).len(), 1);
  }

  #[test]
  fn external_type_hook_enables_named_declarations() {
    let registry = ScopedTable::new()
      .with_external_types(|name| (name == "point").then(|| Type::Named(name.to_string())));
    let result = run_with(
      "{ point p; point q; p = q; p == q; }",
      ParserConfig::default(),
      registry,
    );
    assert!(result.accepted, "{:?}", result.diagnostics);
    let locals = &result.module.entry().unwrap().locals;
    assert_eq!(locals[0], ("p".to_string(), Type::Named("point".into())));

    let unknown = run("{ point p; }");
    assert!(!unknown.accepted);
  }

  #[test]
  fn undeclared_names_and_uncalled_functions_are_rejected() {
    let result = run("{ int x; y = 1; }");
    assert_eq!(errors(&result), vec!["'y' is not declared"]);

    let result = run("{ int f(int a) { return a; } f; }");
    assert_eq!(errors(&result), vec!["function 'f' can only be called"]);
  }

  #[test]
  fn postfix_increment_keeps_the_old_value() {
    let result = run("{ int i; i++; }");
    assert!(result.accepted);
    let slot = LocalSlot(0);
    assert_eq!(
      entry(&result),
      &[
        Instr::LoadLocal(slot),
        Instr::LoadLocal(slot),
        Instr::LoadInt(1),
        Instr::Additive(AddOp::Add),
        Instr::StoreLocal(slot),
        Instr::Discard,
        Instr::Discard,
      ]
    );
  }

  #[test]
  fn prefix_decrement_on_double_uses_a_double_one() {
    let result = run("{ double d; --d; }");
    assert!(result.accepted);
    assert_eq!(
      entry(&result),
      &[
        Instr::LoadLocal(LocalSlot(0)),
        Instr::LoadDouble(1.0),
        Instr::Additive(AddOp::Sub),
        Instr::StoreLocal(LocalSlot(0)),
        Instr::Discard,
      ]
    );
  }

  #[test]
  fn increment_of_a_non_variable_is_rejected() {
    let result = run("5++; { bool b; ++b; }");
    assert_eq!(errors(&result).len(), 2);
  }

  #[test]
  fn pointer_operators_are_recognized_and_rejected() {
    let result = run("{ int x; &x; *x; }");
    assert_eq!(errors(&result).len(), 2);
    assert!(errors(&result)[0].contains("'&x'"));
  }

  #[test]
  fn signed_literal_folds_into_the_constant() {
    let result = run("{ int x; x = 2 * -3; x = 2 * +4; }");
    assert!(result.accepted);
    let code = entry(&result);
    assert!(code.contains(&Instr::LoadInt(-3)));
    assert!(code.contains(&Instr::LoadInt(4)));
    assert!(!code.contains(&Instr::Unary(UnaryOp::Neg)));
  }

  #[test]
  fn leading_sign_on_additive_expression_negates_the_first_term() {
    let result = run("- 2 * 3;");
    assert_eq!(
      entry(&result),
      &[
        Instr::LoadInt(2),
        Instr::LoadInt(3),
        Instr::Multiplicative(MulOp::Mul),
        Instr::Unary(UnaryOp::Neg),
        Instr::Discard,
      ]
    );
  }

  #[test]
  fn resynchronization_consumes_through_the_semicolon() {
    let result = run("1 + ; 2;");
    assert_eq!(errors(&result).len(), 1);
    assert_eq!(entry(&result).last(), Some(&Instr::Discard));
    assert!(entry(&result).contains(&Instr::LoadInt(2)));
  }

  #[test]
  fn condition_must_be_bool_or_int() {
    let result = run("if (\"s\") ; while ('c') ;");
    assert_eq!(errors(&result).len(), 2);
    // The if failed before allocating labels; the while still marks both.
    assert_eq!(
      entry(&result)
        .iter()
        .filter(|i| matches!(i, Instr::Mark(_)))
        .count(),
      2
    );
  }
}
