//! Lexical analysis: turns the raw input string into a stream of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising keywords,
//! punctuators and literals. Multi-character punctuators are matched before
//! single-character ones to avoid ambiguity. Positions are 1-based.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Reserved words. `true` and `false` are lexed as boolean literals instead.
pub const KEYWORDS: &[&str] = &[
  "if", "else", "while", "break", "continue", "return", "int", "bool", "char", "string",
  "double",
];

const MULTI_CHAR_SYMBOLS: &[&str] = &[
  "++", "--", "<=", ">=", "==", "!=", "||", "&&", "+=", "-=", "*=", "/=", "%=",
];

const SINGLE_CHAR_SYMBOLS: &[&str] = &[
  "+", "-", "*", "/", "%", "&", "|", "~", "!", "<", ">", "=", "(", ")", "{", "}", ";", ",",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos {
  pub line: usize,
  pub column: usize,
}

impl Pos {
  pub fn new(line: usize, column: usize) -> Self {
    Self { line, column }
  }
}

impl fmt::Display for Pos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

/// Kinds of tokens recognised by the front-end, with their payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  Keyword(&'static str),
  Symbol(&'static str),
  Ident(String),
  Int(i32),
  Double(f64),
  Bool(bool),
  Char(char),
  Str(String),
  Eof,
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TokenKind::Keyword(word) | TokenKind::Symbol(word) => f.write_str(word),
      TokenKind::Ident(name) => f.write_str(name),
      TokenKind::Int(value) => write!(f, "{value}"),
      TokenKind::Double(value) => write!(f, "{value:?}"),
      TokenKind::Bool(value) => write!(f, "{value}"),
      TokenKind::Char(value) => write!(f, "{value:?}"),
      TokenKind::Str(value) => write!(f, "{value:?}"),
      TokenKind::Eof => f.write_str("EOF"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub pos: Pos,
}

impl Token {
  pub fn new(kind: TokenKind, pos: Pos) -> Self {
    Self { kind, pos }
  }

  pub fn is_symbol(&self, symbol: &str) -> bool {
    matches!(self.kind, TokenKind::Symbol(s) if s == symbol)
  }

  pub fn is_keyword(&self, keyword: &str) -> bool {
    matches!(self.kind, TokenKind::Keyword(k) if k == keyword)
  }

  pub fn is_eof(&self) -> bool {
    matches!(self.kind, TokenKind::Eof)
  }
}

/// Where the engine pulls tokens from. Once the input is exhausted an
/// implementation must keep yielding `TokenKind::Eof`.
pub trait TokenSource {
  fn next_token(&mut self) -> Token;
}

/// Cursor over an already-lexed token vector.
pub struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  /// Take ownership of the tokens; a trailing `Eof` is appended if missing.
  pub fn new(mut tokens: Vec<Token>) -> Self {
    if !tokens.last().is_some_and(Token::is_eof) {
      let pos = tokens.last().map(|t| t.pos).unwrap_or(Pos::new(1, 1));
      tokens.push(Token::new(TokenKind::Eof, pos));
    }
    Self { tokens, pos: 0 }
  }
}

impl TokenSource for TokenStream {
  fn next_token(&mut self) -> Token {
    let last = self.tokens.len() - 1;
    let token = self.tokens[self.pos.min(last)].clone();
    if self.pos < last {
      self.pos += 1;
    }
    token
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer {
    input,
    i: 0,
    line: 1,
    line_start: 0,
  };
  let mut tokens = Vec::new();

  loop {
    lexer.skip_trivia();
    let pos = lexer.pos();
    let Some(c) = lexer.peek() else {
      tokens.push(Token::new(TokenKind::Eof, pos));
      return Ok(tokens);
    };

    if c.is_ascii_digit() {
      tokens.push(Token::new(lexer.number()?, pos));
      continue;
    }

    if c.is_ascii_alphabetic() || c == '_' {
      let word = lexer.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
      let kind = match word {
        "true" => TokenKind::Bool(true),
        "false" => TokenKind::Bool(false),
        _ => match KEYWORDS.iter().find(|k| **k == word) {
          Some(keyword) => TokenKind::Keyword(*keyword),
          None => TokenKind::Ident(word.to_string()),
        },
      };
      tokens.push(Token::new(kind, pos));
      continue;
    }

    if c == '"' {
      let text = lexer.quoted('"')?;
      tokens.push(Token::new(TokenKind::Str(text), pos));
      continue;
    }

    if c == '\'' {
      let text = lexer.quoted('\'')?;
      let mut chars = text.chars();
      let (Some(value), None) = (chars.next(), chars.next()) else {
        return Err(CompileError::at(
          input,
          pos,
          "character literal must contain exactly one character",
        ));
      };
      tokens.push(Token::new(TokenKind::Char(value), pos));
      continue;
    }

    if let Some(symbol) = MULTI_CHAR_SYMBOLS
      .iter()
      .chain(SINGLE_CHAR_SYMBOLS)
      .find(|symbol| lexer.rest().starts_with(**symbol))
    {
      lexer.i += symbol.len();
      tokens.push(Token::new(TokenKind::Symbol(*symbol), pos));
      continue;
    }

    return Err(CompileError::at(input, pos, format!("invalid token: '{c}'")));
  }
}

struct Lexer<'a> {
  input: &'a str,
  i: usize,
  line: usize,
  line_start: usize,
}

impl<'a> Lexer<'a> {
  fn rest(&self) -> &'a str {
    &self.input[self.i..]
  }

  fn peek(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn pos(&self) -> Pos {
    let column = self.input[self.line_start..self.i].chars().count() + 1;
    Pos::new(self.line, column)
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.i += c.len_utf8();
    if c == '\n' {
      self.line += 1;
      self.line_start = self.i;
    }
    Some(c)
  }

  fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
    let start = self.i;
    while self.peek().is_some_and(&pred) {
      self.bump();
    }
    &self.input[start..self.i]
  }

  /// Skip whitespace and `//` comments.
  fn skip_trivia(&mut self) {
    loop {
      self.take_while(char::is_whitespace);
      if self.rest().starts_with("//") {
        self.take_while(|c| c != '\n');
      } else {
        return;
      }
    }
  }

  fn number(&mut self) -> CompileResult<TokenKind> {
    let pos = self.pos();
    let start = self.i;
    self.take_while(|c| c.is_ascii_digit());
    let fraction = self.rest().starts_with('.')
      && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit());
    if fraction {
      self.bump();
      self.take_while(|c| c.is_ascii_digit());
    }
    let text = &self.input[start..self.i];

    if fraction {
      text
        .parse::<f64>()
        .map(TokenKind::Double)
        .map_err(|err| CompileError::at(self.input, pos, format!("invalid number: {err}")))
    } else {
      text
        .parse::<i32>()
        .map(TokenKind::Int)
        .map_err(|err| CompileError::at(self.input, pos, format!("invalid number: {err}")))
    }
  }

  /// Read a quoted literal (the opening quote is the current character) and
  /// return its unescaped contents.
  fn quoted(&mut self, quote: char) -> CompileResult<String> {
    let pos = self.pos();
    self.bump();
    let mut text = String::new();

    loop {
      match self.bump() {
        Some(c) if c == quote => return Ok(text),
        Some('\\') => {
          let escaped = match self.bump() {
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('0') => '\0',
            Some(c @ ('\\' | '\'' | '"')) => c,
            Some(other) => {
              return Err(CompileError::at(
                self.input,
                pos,
                format!("unknown escape sequence '\\{other}'"),
              ));
            }
            None => break,
          };
          text.push(escaped);
        }
        Some('\n') | None => break,
        Some(c) => text.push(c),
      }
    }

    Err(CompileError::at(self.input, pos, "unterminated literal"))
  }
}
