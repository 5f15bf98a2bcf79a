//! Pang lexer.
//!
//! Byte stream in, token stream out, terminated by an EOF token. Whitespace
//! is skipped, newlines are significant, comments are dropped. The lexer
//! keeps a single byte offset as state; locations resolve through the
//! source file's line table.

pub mod token;

pub use token::{Keyword, NumSuffix, Token, TokenKind};

use crate::error::{DiagnosticEmitter, DiagnosticLevel};
use crate::source::SourceFile;

pub struct Lexer<'a> {
    file: &'a SourceFile,
    pos: usize,
    diagnostics: &'a mut DiagnosticEmitter,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a SourceFile, diagnostics: &'a mut DiagnosticEmitter) -> Self {
        Self {
            file,
            pos: 0,
            diagnostics,
        }
    }

    /// Tokenize the whole file.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn source(&self) -> &str {
        &self.file.content
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source().len()
    }

    fn peek(&self) -> u8 {
        self.source().as_bytes().get(self.pos).copied().unwrap_or(0)
    }

    fn peek_next(&self) -> u8 {
        self.source().as_bytes().get(self.pos + 1).copied().unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let b = self.peek();
        if !self.is_at_end() {
            self.pos += 1;
        }
        b
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind, start: usize) -> Token {
        let lexeme = &self.source()[start..self.pos];
        Token::new(kind, lexeme, self.file.location(start, self.pos - start))
    }

    fn report(&mut self, level: DiagnosticLevel, start: usize, length: usize, message: impl Into<String>) {
        let location = self.file.location(start, length.max(1));
        self.diagnostics.report(level, location, message);
    }

    fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace();

            if self.is_at_end() {
                return self.make_token(TokenKind::Eof, self.pos);
            }

            let start = self.pos;
            let c = self.advance();

            let kind = match c {
                b'(' => TokenKind::LParen,
                b')' => TokenKind::RParen,
                b'{' => TokenKind::LBrace,
                b'}' => TokenKind::RBrace,
                b'[' => TokenKind::LBracket,
                b']' => TokenKind::RBracket,
                b',' => TokenKind::Comma,
                b';' => TokenKind::Semi,
                b'?' => TokenKind::Question,
                b'~' => TokenKind::Tilde,
                b'^' => TokenKind::Caret,
                b'\n' => TokenKind::Newline,

                b'%' => {
                    if self.matches(b'=') {
                        TokenKind::PercentAssign
                    } else {
                        TokenKind::Percent
                    }
                }
                b'+' => {
                    if self.matches(b'=') {
                        TokenKind::PlusAssign
                    } else if self.matches(b'+') {
                        TokenKind::PlusPlus
                    } else {
                        TokenKind::Plus
                    }
                }
                b'-' => {
                    if self.matches(b'=') {
                        TokenKind::MinusAssign
                    } else if self.matches(b'-') {
                        TokenKind::MinusMinus
                    } else if self.matches(b'>') {
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                b'*' => {
                    if self.matches(b'=') {
                        TokenKind::StarAssign
                    } else if self.matches(b'*') {
                        TokenKind::StarStar
                    } else {
                        TokenKind::Star
                    }
                }
                b'/' => {
                    if self.matches(b'=') {
                        TokenKind::SlashAssign
                    } else if self.matches(b'/') {
                        self.skip_line_comment();
                        continue;
                    } else if self.matches(b'*') {
                        self.skip_block_comment(start);
                        continue;
                    } else {
                        TokenKind::Slash
                    }
                }
                b'!' => {
                    if self.matches(b'=') {
                        TokenKind::Ne
                    } else {
                        TokenKind::Not
                    }
                }
                b'=' => {
                    if self.matches(b'=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                b'<' => {
                    if self.matches(b'=') {
                        TokenKind::Le
                    } else if self.matches(b'<') {
                        TokenKind::Shl
                    } else {
                        TokenKind::Lt
                    }
                }
                b'>' => {
                    if self.matches(b'=') {
                        TokenKind::Ge
                    } else if self.matches(b'>') {
                        TokenKind::Shr
                    } else {
                        TokenKind::Gt
                    }
                }
                b'&' => {
                    if self.matches(b'&') {
                        TokenKind::AndAnd
                    } else {
                        TokenKind::Amp
                    }
                }
                b'|' => {
                    if self.matches(b'|') {
                        TokenKind::OrOr
                    } else {
                        TokenKind::Pipe
                    }
                }
                b':' => {
                    if self.matches(b':') {
                        TokenKind::PathSep
                    } else {
                        TokenKind::Colon
                    }
                }
                b'.' => TokenKind::Dot,

                b'"' => {
                    self.pos = start;
                    return self.scan_string();
                }
                b'0'..=b'9' => {
                    self.pos = start;
                    return self.scan_number();
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.pos = start;
                    return self.scan_identifier();
                }

                _ => {
                    // Re-read the full character so multi-byte input does not
                    // get split mid-sequence.
                    self.pos = start;
                    let ch = self.source()[start..].chars().next().unwrap_or('?');
                    self.pos = start + ch.len_utf8();
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        ch.len_utf8(),
                        format!("Unexpected character: {}", ch),
                    );
                    // Synthesize an identifier so the parser can recover.
                    return self.make_token(TokenKind::Ident(ch.to_string()), start);
                }
            };

            return self.make_token(kind, start);
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), b' ' | b'\r' | b'\t') {
            self.pos += 1;
        }
    }

    fn skip_line_comment(&mut self) {
        // Leave the newline in place; it is a significant token.
        while self.peek() != b'\n' && !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self, start: usize) {
        let mut depth = 1usize;
        while !self.is_at_end() && depth > 0 {
            if self.peek() == b'/' && self.peek_next() == b'*' {
                self.pos += 2;
                depth += 1;
            } else if self.peek() == b'*' && self.peek_next() == b'/' {
                self.pos += 2;
                depth -= 1;
            } else {
                self.pos += 1;
            }
        }
        if depth > 0 {
            self.report(
                DiagnosticLevel::Error,
                start,
                self.pos - start,
                "Unterminated block comment",
            );
        }
    }

    fn scan_string(&mut self) -> Token {
        let start = self.pos;
        self.advance(); // opening quote

        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\\' {
                self.pos += 1; // the backslash
                if !self.is_at_end() {
                    // Skip the escaped character wholesale; it may be multi-byte.
                    let ch = self.source()[self.pos..].chars().next().unwrap_or('\0');
                    self.pos += ch.len_utf8();
                }
            } else {
                let ch = self.source()[self.pos..].chars().next().unwrap_or('\0');
                self.pos += ch.len_utf8();
            }
        }

        if self.is_at_end() {
            self.report(
                DiagnosticLevel::Error,
                start,
                self.pos - start,
                "Unterminated string",
            );
            let raw = self.source()[start + 1..self.pos].to_string();
            let value = self.process_escapes(&raw, start);
            return self.make_token(TokenKind::Str(value), start);
        }

        let raw = self.source()[start + 1..self.pos].to_string();
        self.advance(); // closing quote
        let value = self.process_escapes(&raw, start);
        self.make_token(TokenKind::Str(value), start)
    }

    fn process_escapes(&mut self, raw: &str, start: usize) -> String {
        let mut result = String::with_capacity(raw.len());
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('0') => result.push('\0'),
                Some('u') => {
                    if chars.clone().next() == Some('{') {
                        chars.next();
                        let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(c) => result.push(c),
                            None => {
                                self.report(
                                    DiagnosticLevel::Error,
                                    start,
                                    1,
                                    format!("Invalid unicode escape: \\u{{{}}}", hex),
                                );
                            }
                        }
                    } else {
                        self.report(
                            DiagnosticLevel::Error,
                            start,
                            1,
                            "Expected '{' after \\u in unicode escape",
                        );
                        result.push('u');
                    }
                }
                Some(c) => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        1,
                        format!("Unknown escape sequence: \\{}", c),
                    );
                    result.push(c);
                }
                None => result.push('\\'),
            }
        }
        result
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }

        let mut is_float = false;
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }

        let number_end = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.pos += 1;
        }

        let number_part = self.source()[start..number_end].to_string();
        let suffix_part = self.source()[number_end..self.pos].to_string();
        let lexeme = self.source()[start..self.pos].to_string();

        let suffix = if suffix_part.is_empty() {
            None
        } else {
            match NumSuffix::from_str(&suffix_part) {
                Some(s) if is_float && s != NumSuffix::F32 => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        lexeme.len(),
                        format!("Invalid suffix '{}' on float literal", suffix_part),
                    );
                    None
                }
                Some(s) if !is_float && s == NumSuffix::F32 => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        lexeme.len(),
                        format!("Invalid suffix '{}' on integer literal", suffix_part),
                    );
                    None
                }
                Some(s) => Some(s),
                None => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        lexeme.len(),
                        format!("Invalid numeric suffix: {}", suffix_part),
                    );
                    None
                }
            }
        };

        if is_float {
            let value = match number_part.parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        lexeme.len(),
                        format!("Invalid number format: {}", lexeme),
                    );
                    0.0
                }
            };
            self.make_token(TokenKind::Float { value, suffix }, start)
        } else {
            let value = match number_part.parse::<i64>() {
                Ok(v) => v,
                Err(_) => {
                    self.report(
                        DiagnosticLevel::Error,
                        start,
                        lexeme.len(),
                        format!("Invalid number format: {}", lexeme),
                    );
                    0
                }
            };
            self.make_token(TokenKind::Int { value, suffix }, start)
        }
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.pos += 1;
        }

        let text = &self.source()[start..self.pos];
        let kind = match text {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "null" => TokenKind::Null,
            _ => match Keyword::from_str(text) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(text.to_string()),
            },
        };
        self.make_token(kind, start)
    }
}
