// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use std::fmt;

const MAX_BRACKET_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Kw {
    fn lookup(word: &str) -> Option<Kw> {
        let kw = match word {
            "False" => Kw::False,
            "None" => Kw::None,
            "True" => Kw::True,
            "and" => Kw::And,
            "as" => Kw::As,
            "assert" => Kw::Assert,
            "async" => Kw::Async,
            "await" => Kw::Await,
            "break" => Kw::Break,
            "class" => Kw::Class,
            "continue" => Kw::Continue,
            "def" => Kw::Def,
            "del" => Kw::Del,
            "elif" => Kw::Elif,
            "else" => Kw::Else,
            "except" => Kw::Except,
            "finally" => Kw::Finally,
            "for" => Kw::For,
            "from" => Kw::From,
            "global" => Kw::Global,
            "if" => Kw::If,
            "import" => Kw::Import,
            "in" => Kw::In,
            "is" => Kw::Is,
            "lambda" => Kw::Lambda,
            "nonlocal" => Kw::Nonlocal,
            "not" => Kw::Not,
            "or" => Kw::Or,
            "pass" => Kw::Pass,
            "raise" => Kw::Raise,
            "return" => Kw::Return,
            "try" => Kw::Try,
            "while" => Kw::While,
            "with" => Kw::With,
            "yield" => Kw::Yield,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,
    At,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Assign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Keyword(Kw),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Punct(Punct),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for LexError {}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    Lexer::new(source).scan_tokens()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Spanned>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.replace("\r\n", "\n").chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: self.line,
        }
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.token),
            None | Some(Token::Newline)
        )
    }

    fn scan_tokens(mut self) -> Result<Vec<Spanned>, LexError> {
        loop {
            if self.at_line_start && self.depth == 0 && !self.scan_indentation()? {
                break;
            }
            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' => {
                    if self.depth == 0 && !self.last_is_newline() {
                        self.push(Token::Newline);
                    }
                    self.bump();
                    self.line += 1;
                    if self.depth == 0 {
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\n') {
                        self.bump();
                        self.line += 1;
                    } else {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                }
                '"' | '\'' => {
                    let token = self.scan_string(false, false)?;
                    self.push(token);
                }
                c if c.is_ascii_digit() => {
                    let token = self.scan_number()?;
                    self.push(token);
                }
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    let token = self.scan_number()?;
                    self.push(token);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let token = self.scan_identifier()?;
                    self.push(token);
                }
                _ => {
                    let punct = self.scan_punct()?;
                    self.push(Token::Punct(punct));
                }
            }
        }
        if !self.last_is_newline() {
            self.push(Token::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent);
        }
        self.push(Token::Eof);
        Ok(self.tokens)
    }

    /// Measures leading whitespace and emits indent/dedent tokens. Returns
    /// false at end of input.
    fn scan_indentation(&mut self) -> Result<bool, LexError> {
        loop {
            let mut width = 0;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    self.line += 1;
                }
                Some('#') => self.skip_comment(),
                Some(_) => {
                    self.at_line_start = false;
                    let current = self.indents.last().copied().unwrap_or(0);
                    if width > current {
                        self.indents.push(width);
                        self.push(Token::Indent);
                    } else {
                        while width < self.indents.last().copied().unwrap_or(0) {
                            self.indents.pop();
                            self.push(Token::Dedent);
                        }
                        if width != self.indents.last().copied().unwrap_or(0) {
                            return Err(
                                self.error("unindent does not match any outer indentation level")
                            );
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn scan_identifier(&mut self) -> Result<Token, LexError> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('"' | '\'')) {
            let prefix = word.to_ascii_lowercase();
            if matches!(
                prefix.as_str(),
                "r" | "u" | "b" | "f" | "rf" | "fr" | "br" | "rb"
            ) {
                return self.scan_string(prefix.contains('r'), prefix.contains('f'));
            }
        }
        Ok(match Kw::lookup(&word) {
            Some(kw) => Token::Keyword(kw),
            None => Token::Name(word),
        })
    }

    fn scan_string(&mut self, raw: bool, formatted: bool) -> Result<Token, LexError> {
        let start_line = self.line;
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(LexError {
                    message: "unterminated string literal".to_string(),
                    line: start_line,
                });
            };
            match c {
                '\n' if !triple => {
                    return Err(LexError {
                        message: "unterminated string literal".to_string(),
                        line: start_line,
                    });
                }
                '\n' => {
                    self.line += 1;
                    value.push('\n');
                }
                c if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    value.push(c);
                }
                '\\' => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated string literal"))?;
                    if escaped == '\n' {
                        self.line += 1;
                        if raw {
                            value.push_str("\\\n");
                        }
                        continue;
                    }
                    if raw {
                        value.push('\\');
                        value.push(escaped);
                        continue;
                    }
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '\\' => value.push('\\'),
                        '\'' => value.push('\''),
                        '"' => value.push('"'),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                c => value.push(c),
            }
        }
        Ok(if formatted {
            Token::FStr(value)
        } else {
            Token::Str(value)
        })
    }

    fn scan_number(&mut self) -> Result<Token, LexError> {
        let mut text = String::new();
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            let digits = text.replace('_', "");
            return i64::from_str_radix(&digits, 16)
                .map(Token::Int)
                .map_err(|_| self.error(format!("invalid hexadecimal literal 0x{text}")));
        }

        let mut is_float = false;
        self.take_digits(&mut text);
        if self.peek() == Some('.')
            && !self
                .peek_at(1)
                .is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            is_float = true;
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if signed {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
                self.take_digits(&mut text);
            }
        }
        if self
            .peek()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            return Err(self.error(format!("invalid decimal literal '{text}'")));
        }
        let digits = text.replace('_', "");
        if is_float {
            digits
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))
        } else {
            digits
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(format!("integer literal too large '{text}'")))
        }
    }

    fn take_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn follows(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn open_bracket(&mut self) -> Result<(), LexError> {
        if self.depth >= MAX_BRACKET_DEPTH {
            return Err(self.error("too many nested parentheses"));
        }
        self.depth += 1;
        Ok(())
    }

    fn scan_punct(&mut self) -> Result<Punct, LexError> {
        let ch = self
            .bump()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        let punct = match ch {
            '(' => {
                self.open_bracket()?;
                Punct::LParen
            }
            '[' => {
                self.open_bracket()?;
                Punct::LBracket
            }
            '{' => {
                self.open_bracket()?;
                Punct::LBrace
            }
            ')' => {
                self.depth = self.depth.saturating_sub(1);
                Punct::RParen
            }
            ']' => {
                self.depth = self.depth.saturating_sub(1);
                Punct::RBracket
            }
            '}' => {
                self.depth = self.depth.saturating_sub(1);
                Punct::RBrace
            }
            ',' => Punct::Comma,
            ':' => Punct::Colon,
            '.' => Punct::Dot,
            ';' => Punct::Semicolon,
            '@' => Punct::At,
            '~' => Punct::Tilde,
            '^' => Punct::Caret,
            '&' => Punct::Amp,
            '|' => Punct::Pipe,
            '+' if self.follows('=') => Punct::PlusAssign,
            '+' => Punct::Plus,
            '-' if self.follows('=') => Punct::MinusAssign,
            '-' if self.follows('>') => Punct::Arrow,
            '-' => Punct::Minus,
            '*' if self.follows('*') => Punct::DoubleStar,
            '*' if self.follows('=') => Punct::StarAssign,
            '*' => Punct::Star,
            '/' if self.follows('/') => {
                if self.follows('=') {
                    Punct::DoubleSlashAssign
                } else {
                    Punct::DoubleSlash
                }
            }
            '/' if self.follows('=') => Punct::SlashAssign,
            '/' => Punct::Slash,
            '%' if self.follows('=') => Punct::PercentAssign,
            '%' => Punct::Percent,
            '=' if self.follows('=') => Punct::EqEq,
            '=' => Punct::Assign,
            '!' if self.follows('=') => Punct::NotEq,
            '<' if self.follows('=') => Punct::LtEq,
            '<' => Punct::Lt,
            '>' if self.follows('=') => Punct::GtEq,
            '>' => Punct::Gt,
            other => return Err(self.error(format!("invalid character '{other}'"))),
        };
        Ok(punct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn indentation_produces_block_tokens() {
        let tokens = kinds("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Kw::If),
                Token::Name("x".into()),
                Token::Punct(Punct::Colon),
                Token::Newline,
                Token::Indent,
                Token::Name("y".into()),
                Token::Punct(Punct::Assign),
                Token::Int(1),
                Token::Newline,
                Token::Dedent,
                Token::Name("z".into()),
                Token::Punct(Punct::Assign),
                Token::Int(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn brackets_suppress_newlines() {
        let tokens = kinds("x = [1,\n     2]\n");
        assert!(!tokens[..tokens.len() - 2].contains(&Token::Newline));
    }

    #[test]
    fn string_prefixes_and_escapes() {
        let tokens = kinds("a = f'total {n}'\nb = r'\\d+'\nc = 'it\\'s'\n");
        assert!(tokens.contains(&Token::FStr("total {n}".into())));
        assert!(tokens.contains(&Token::Str("\\d+".into())));
        assert!(tokens.contains(&Token::Str("it's".into())));
    }

    #[test]
    fn numbers_cover_floats_and_exponents() {
        let tokens = kinds("x = 1_000 + 2.5 + .5 + 1e3\n");
        assert!(tokens.contains(&Token::Int(1000)));
        assert!(tokens.contains(&Token::Float(2.5)));
        assert!(tokens.contains(&Token::Float(0.5)));
        assert!(tokens.contains(&Token::Float(1000.0)));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let tokens = kinds("# header\n\nx = 1  # trailing\n\n");
        assert_eq!(tokens.first(), Some(&Token::Name("x".into())));
    }

    #[test]
    fn bad_dedent_is_reported_with_line() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("x = 'open\n").is_err());
    }

    #[test]
    fn bracket_nesting_is_capped() {
        let ok = format!("x = {}{}\n", "[".repeat(MAX_BRACKET_DEPTH), "]".repeat(MAX_BRACKET_DEPTH));
        assert!(tokenize(&ok).is_ok());

        let deep = format!("x = {}1\n", "({[".repeat(1000));
        let err = tokenize(&deep).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
        assert_eq!(err.line, 1);
    }
}
