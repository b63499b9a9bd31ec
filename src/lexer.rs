//! The lexer (§4.1): turns source text into a token stream, desugaring
//! string interpolation at scan time.

use crate::error::LexError;
use crate::token::{Token, TokenKind};

/// Scans `source` into a token stream terminated by `TokenKind::EndOfFile`.
/// Lexing does not stop at the first error: bad characters are skipped and
/// scanning resumes at the next whitespace boundary, so a single pass can
/// surface multiple errors (mirroring the parser's "multiple errors per
/// file are expected" policy, extended here to the lexer).
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut lexer = Lexer::new(source);
    lexer.run();
    (lexer.tokens, lexer.errors)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    pending_newline: bool,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            pending_newline: false,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(&mut self) {
        loop {
            self.skip_trivia();
            if self.is_at_end() {
                break;
            }
            let start_line = self.line;
            let start_col = self.col;
            match self.scan_token() {
                Ok(Some(mut token)) => {
                    token.line = start_line;
                    token.col = start_col;
                    token.preceded_by_newline = self.pending_newline;
                    self.pending_newline = false;
                    self.tokens.push(token);
                }
                Ok(None) => {}
                Err(err) => self.errors.push(err),
            }
        }
        let mut eof = Token::eof(self.line, self.col);
        eof.preceded_by_newline = self.pending_newline;
        self.tokens.push(eof);
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some('\n') => {
                    self.advance();
                    self.pending_newline = true;
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start_line = self.line;
                    let start_col = self.col;
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => {
                                self.errors.push(LexError::UnterminatedComment {
                                    line: start_line,
                                    col: start_col,
                                });
                                break;
                            }
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some('\n') => {
                                self.advance();
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_token(&mut self) -> Result<Option<Token>, LexError> {
        let line = self.line;
        let col = self.col;
        let c = self.advance().expect("checked not at end");
        use TokenKind::*;
        let kind_and_lexeme = match c {
            '(' => Some((LeftParen, "(".to_string())),
            ')' => Some((RightParen, ")".to_string())),
            '{' => Some((LeftBrace, "{".to_string())),
            '}' => Some((RightBrace, "}".to_string())),
            '[' => Some((LeftBracket, "[".to_string())),
            ']' => Some((RightBracket, "]".to_string())),
            ',' => Some((Comma, ",".to_string())),
            ';' => Some((Semicolon, ";".to_string())),
            '+' => Some((Plus, "+".to_string())),
            '*' => Some((Star, "*".to_string())),
            '%' => Some((Percent, "%".to_string())),
            ':' => Some((Colon, ":".to_string())),
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.advance();
                    self.advance();
                    Some((DotDotDot, "...".to_string()))
                } else {
                    Some((Dot, ".".to_string()))
                }
            }
            '-' => {
                if self.peek() == Some('>') {
                    self.advance();
                    Some((Arrow, "->".to_string()))
                } else {
                    Some((Minus, "-".to_string()))
                }
            }
            '/' => Some((Slash, "/".to_string())),
            '?' => {
                if self.peek() == Some('?') {
                    self.advance();
                    Some((QuestionQuestion, "??".to_string()))
                } else {
                    Some((Question, "?".to_string()))
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Some((BangEqual, "!=".to_string()))
                } else {
                    Some((Bang, "!".to_string()))
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Some((EqualEqual, "==".to_string()))
                } else if self.peek() == Some('>') {
                    self.advance();
                    Some((Arrow, "=>".to_string()))
                } else {
                    Some((Equal, "=".to_string()))
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Some((LessEqual, "<=".to_string()))
                } else {
                    Some((Less, "<".to_string()))
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Some((GreaterEqual, ">=".to_string()))
                } else {
                    Some((Greater, ">".to_string()))
                }
            }
            '"' => return self.scan_string(line, col),
            c if c.is_ascii_digit() => return Ok(Some(self.scan_number(line, col))),
            c if is_identifier_start(c) => return Ok(Some(self.scan_identifier(line, col))),
            other => {
                return Err(LexError::UnexpectedChar {
                    ch: other,
                    line,
                    col,
                })
            }
        };
        Ok(kind_and_lexeme.map(|(kind, lexeme)| Token::new(kind, lexeme, line, col)))
    }

    fn scan_number(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos - 1;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let lexeme: String = self.chars[start..self.pos].iter().collect();
        Token::new(TokenKind::Number, lexeme, line, col)
    }

    fn scan_identifier(&mut self, line: u32, col: u32) -> Token {
        let start = self.pos - 1;
        while matches!(self.peek(), Some(c) if is_identifier_continue(c)) {
            self.advance();
        }
        let lexeme: String = self.chars[start..self.pos].iter().collect();
        if lexeme == "_" {
            return Token::new(TokenKind::Underscore, lexeme, line, col);
        }
        let kind = TokenKind::keyword(&lexeme).unwrap_or(TokenKind::Identifier);
        Token::new(kind, lexeme, line, col)
    }

    /// Scans a `"`-delimited string, desugaring any `${expr}`
    /// interpolations into the token sequence for
    /// `"prefix" + str(expr) + "suffix"` (§4.1).
    ///
    /// A plain string with no interpolation is returned as a single
    /// `String` token (`Ok(Some(_))`). An interpolated string instead
    /// splices its desugared multi-token form directly onto
    /// `self.tokens` and returns `Ok(None)`, since one source string can
    /// expand into many tokens.
    fn scan_string(&mut self, line: u32, col: u32) -> Result<Option<Token>, LexError> {
        let mut segments: Vec<StringSegment> = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError::UnterminatedString { line, col });
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.advance().ok_or(LexError::UnterminatedString { line, col })?;
                    literal.push(unescape(escaped));
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    segments.push(StringSegment::Literal(std::mem::take(&mut literal)));
                    self.advance();
                    self.advance();
                    let inner_source = self.scan_interpolation_source(line, col)?;
                    let (inner_tokens, inner_errors) = tokenize(&inner_source);
                    self.errors.extend(inner_errors);
                    segments.push(StringSegment::Expr(inner_tokens));
                }
                Some(c) => {
                    self.advance();
                    literal.push(c);
                }
            }
        }
        segments.push(StringSegment::Literal(literal));

        if segments.len() == 1 {
            let StringSegment::Literal(text) = segments.into_iter().next().unwrap() else {
                unreachable!()
            };
            return Ok(Some(Token::new(TokenKind::String, text, line, col)));
        }

        self.splice_interpolation(segments, line, col);
        Ok(None)
    }

    /// Appends the desugared `+`-chain token sequence directly onto
    /// `self.tokens`.
    fn splice_interpolation(&mut self, segments: Vec<StringSegment>, line: u32, col: u32) {
        let preceded_by_newline = self.pending_newline;
        self.pending_newline = false;
        let mut first = true;
        for segment in segments {
            if !first {
                self.tokens.push(Token::new(TokenKind::Plus, "+", line, col));
            }
            match segment {
                StringSegment::Literal(text) => {
                    let mut tok = Token::new(TokenKind::String, text, line, col);
                    if first {
                        tok.preceded_by_newline = preceded_by_newline;
                    }
                    self.tokens.push(tok);
                }
                StringSegment::Expr(mut inner) => {
                    // Drop the inner stream's own EndOfFile marker.
                    if matches!(inner.last(), Some(t) if t.kind == TokenKind::EndOfFile) {
                        inner.pop();
                    }
                    let mut str_tok = Token::new(TokenKind::Identifier, "str", line, col);
                    if first {
                        str_tok.preceded_by_newline = preceded_by_newline;
                    }
                    self.tokens.push(str_tok);
                    self.tokens.push(Token::new(TokenKind::LeftParen, "(", line, col));
                    self.tokens.extend(inner);
                    self.tokens.push(Token::new(TokenKind::RightParen, ")", line, col));
                }
            }
            first = false;
        }
    }

    /// Scans the raw source text of a `${ ... }` interpolation, balancing
    /// nested braces and tolerating nested string literals (which may
    /// themselves contain further interpolations) without prematurely
    /// closing on a `}` that belongs to a nested string.
    fn scan_interpolation_source(&mut self, line: u32, col: u32) -> Result<String, LexError> {
        let mut depth = 1usize;
        let mut buf = String::new();
        loop {
            match self.peek() {
                None => return Err(LexError::UnterminatedInterpolation { line, col }),
                Some('{') => {
                    depth += 1;
                    buf.push(self.advance().unwrap());
                }
                Some('}') => {
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    buf.push('}');
                }
                Some('"') => {
                    buf.push(self.advance().unwrap());
                    self.copy_nested_string(&mut buf, line, col)?;
                }
                Some(_) => {
                    buf.push(self.advance().unwrap());
                }
            }
        }
        Ok(buf)
    }

    /// Copies a nested string literal's raw text (including any further
    /// `${...}` interpolations) verbatim into `buf`, so the outer brace
    /// count in `scan_interpolation_source` is unaffected by it.
    fn copy_nested_string(&mut self, buf: &mut String, line: u32, col: u32) -> Result<(), LexError> {
        loop {
            match self.peek() {
                None => return Err(LexError::UnterminatedString { line, col }),
                Some('"') => {
                    buf.push(self.advance().unwrap());
                    return Ok(());
                }
                Some('\\') => {
                    buf.push(self.advance().unwrap());
                    if let Some(c) = self.advance() {
                        buf.push(c);
                    }
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    buf.push(self.advance().unwrap());
                    buf.push(self.advance().unwrap());
                    let mut depth = 1usize;
                    loop {
                        match self.peek() {
                            None => return Err(LexError::UnterminatedInterpolation { line, col }),
                            Some('{') => {
                                depth += 1;
                                buf.push(self.advance().unwrap());
                            }
                            Some('}') => {
                                buf.push(self.advance().unwrap());
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some('"') => {
                                buf.push(self.advance().unwrap());
                                self.copy_nested_string(buf, line, col)?;
                            }
                            Some(_) => buf.push(self.advance().unwrap()),
                        }
                    }
                }
                Some(_) => buf.push(self.advance().unwrap()),
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }
}

enum StringSegment {
    Literal(String),
    Expr(Vec<Token>),
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_identifier_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}
