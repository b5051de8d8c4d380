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

use crate::script::ast::*;
use crate::script::lexer::{tokenize, Kw, LexError, Punct, Spanned, Token};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            line: err.line,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Deepest combined nesting of expressions and blocks the parser accepts.
pub const MAX_NESTING: usize = 64;

pub fn parse(source: &str) -> PResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

/// Parses a standalone expression, as found inside f-string braces.
pub fn parse_expression(source: &str, line: usize) -> PResult<Expr> {
    let relocate = |mut err: ParseError| {
        err.line = line;
        err
    };
    let tokens = tokenize(source.trim()).map_err(|e| relocate(e.into()))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_testlist().map_err(relocate)?;
    while parser.match_token(&Token::Newline) {}
    if !parser.check(&Token::Eof) {
        return Err(relocate(parser.error("invalid expression")));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    current: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens
            .get(self.current + n)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_punct(&self, punct: Punct) -> bool {
        self.check(&Token::Punct(punct))
    }

    fn match_punct(&mut self, punct: Punct) -> bool {
        self.match_token(&Token::Punct(punct))
    }

    fn check_kw(&self, kw: Kw) -> bool {
        self.check(&Token::Keyword(kw))
    }

    fn match_kw(&mut self, kw: Kw) -> bool {
        self.match_token(&Token::Keyword(kw))
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line(),
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> PResult<()> {
        if self.match_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{what}'")))
        }
    }

    fn expect_kw(&mut self, kw: Kw, what: &str) -> PResult<()> {
        if self.match_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{what}'")))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Newline | Token::Eof | Token::Punct(Punct::Semicolon)
        )
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Token::Name(_) | Token::Int(_) | Token::Float(_) | Token::Str(_) | Token::FStr(_) => {
                true
            }
            Token::Keyword(kw) => matches!(
                kw,
                Kw::None | Kw::True | Kw::False | Kw::Not | Kw::Lambda | Kw::Await
            ),
            Token::Punct(p) => matches!(
                p,
                Punct::LParen
                    | Punct::LBracket
                    | Punct::LBrace
                    | Punct::Minus
                    | Punct::Plus
                    | Punct::Tilde
            ),
            _ => false,
        }
    }

    fn parse_program(mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.check(&Token::Eof) {
            if self.match_token(&Token::Newline) {
                continue;
            }
            if self.check(&Token::Indent) {
                return Err(self.error("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek() {
            Token::Keyword(Kw::If) => {
                self.advance();
                self.parse_if()?
            }
            Token::Keyword(Kw::For) => self.parse_for()?,
            Token::Keyword(Kw::While) => {
                self.advance();
                let test = self.parse_test()?;
                let body = self.parse_block()?;
                StmtKind::While { test, body }
            }
            Token::Keyword(Kw::Def) => self.parse_def()?,
            Token::Keyword(Kw::Try) => self.parse_try()?,
            Token::Keyword(
                kw @ (Kw::Class
                | Kw::With
                | Kw::Async
                | Kw::Global
                | Kw::Nonlocal
                | Kw::Del
                | Kw::Yield
                | Kw::Assert),
            ) => {
                let name = format!("{kw:?}").to_lowercase();
                return Err(self.error(format!("'{name}' statements are not supported")));
            }
            Token::Keyword(Kw::Elif | Kw::Else | Kw::Except | Kw::Finally) => {
                return Err(self.error("invalid syntax"));
            }
            _ => return self.parse_simple_line(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.parse_small_stmt()?;
            stmts.push(Stmt { kind, line });
            if self.match_punct(Punct::Semicolon) && !self.at_line_end() {
                continue;
            }
            break;
        }
        if !self.match_token(&Token::Newline) && !self.check(&Token::Eof) {
            return Err(self.error("invalid syntax"));
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::parse_suite)
    }

    fn parse_suite(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct(Punct::Colon, ":")?;
        if !self.match_token(&Token::Newline) {
            return self.parse_simple_line();
        }
        if !self.match_token(&Token::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.match_token(&Token::Dedent) {
            if self.check(&Token::Eof) {
                break;
            }
            if self.match_token(&Token::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.check_kw(Kw::Elif) {
            let line = self.line();
            self.advance();
            vec![Stmt {
                kind: self.nested(Self::parse_if)?,
                line,
            }]
        } else if self.match_kw(Kw::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Kw::For, "for")?;
        let target = self.parse_target_list()?;
        check_target(&target).map_err(|m| self.error(m))?;
        self.expect_kw(Kw::In, "in")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        if self.check_kw(Kw::Else) {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(StmtKind::For { target, iter, body })
    }

    fn parse_def(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Kw::Def, "def")?;
        let name = self.expect_name()?;
        self.expect_punct(Punct::LParen, "(")?;
        let mut params = Vec::new();
        while !self.match_punct(Punct::RParen) {
            if self.check_punct(Punct::Star) || self.check_punct(Punct::DoubleStar) {
                return Err(self.error("variadic parameters are not supported"));
            }
            let param = self.expect_name()?;
            if self.match_punct(Punct::Colon) {
                self.parse_test()?;
            }
            let default = if self.match_punct(Punct::Assign) {
                Some(self.parse_test()?)
            } else {
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, ")")?;
                break;
            }
        }
        if self.match_punct(Punct::Arrow) {
            self.parse_test()?;
        }
        let body = self.parse_block()?;
        Ok(StmtKind::FunctionDef { name, params, body })
    }

    fn parse_try(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Kw::Try, "try")?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.match_kw(Kw::Except) {
            let kind = if self.check_punct(Punct::Colon) {
                None
            } else {
                let expr = self.parse_test()?;
                Some(exception_names(&expr).map_err(|m| self.error(m))?)
            };
            let name = if self.match_kw(Kw::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler { kind, name, body });
        }
        if self.check_kw(Kw::Else) {
            return Err(self.error("'try ... else' is not supported"));
        }
        let finalbody = if self.match_kw(Kw::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finalbody,
        })
    }

    fn parse_small_stmt(&mut self) -> PResult<StmtKind> {
        match self.peek() {
            Token::Keyword(Kw::Pass) => {
                self.advance();
                return Ok(StmtKind::Pass);
            }
            Token::Keyword(Kw::Break) => {
                self.advance();
                return Ok(StmtKind::Break);
            }
            Token::Keyword(Kw::Continue) => {
                self.advance();
                return Ok(StmtKind::Continue);
            }
            Token::Keyword(Kw::Return) => {
                self.advance();
                if self.at_line_end() {
                    return Ok(StmtKind::Return(None));
                }
                return Ok(StmtKind::Return(Some(self.parse_testlist()?)));
            }
            Token::Keyword(Kw::Raise) => {
                self.advance();
                if self.at_line_end() {
                    return Ok(StmtKind::Raise(None));
                }
                let exc = self.parse_test()?;
                if self.match_kw(Kw::From) {
                    self.parse_test()?;
                }
                return Ok(StmtKind::Raise(Some(exc)));
            }
            Token::Keyword(Kw::Import) => {
                self.advance();
                return self.parse_import();
            }
            Token::Keyword(Kw::From) => {
                self.advance();
                return self.parse_from_import();
            }
            _ => {}
        }

        let first = self.parse_testlist()?;
        if self.check_punct(Punct::Assign) {
            let mut chain = vec![first];
            while self.match_punct(Punct::Assign) {
                chain.push(self.parse_testlist()?);
            }
            let value = chain.pop().ok_or_else(|| self.error("invalid syntax"))?;
            for target in &chain {
                check_target(target).map_err(|m| self.error(m))?;
            }
            return Ok(StmtKind::Assign {
                targets: chain,
                value,
            });
        }
        if let Some(op) = self.match_aug_assign() {
            if !matches!(
                first,
                Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
            ) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }
        if self.match_punct(Punct::Colon) {
            check_target(&first).map_err(|m| self.error(m))?;
            self.parse_test()?;
            if self.match_punct(Punct::Assign) {
                let value = self.parse_testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![first],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }
        Ok(StmtKind::Expr(first))
    }

    fn match_aug_assign(&mut self) -> Option<BinOp> {
        let op = match self.peek() {
            Token::Punct(Punct::PlusAssign) => BinOp::Add,
            Token::Punct(Punct::MinusAssign) => BinOp::Sub,
            Token::Punct(Punct::StarAssign) => BinOp::Mul,
            Token::Punct(Punct::SlashAssign) => BinOp::Div,
            Token::Punct(Punct::DoubleSlashAssign) => BinOp::FloorDiv,
            Token::Punct(Punct::PercentAssign) => BinOp::Mod,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.match_punct(Punct::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_import(&mut self) -> PResult<StmtKind> {
        let mut names = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.match_kw(Kw::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> PResult<StmtKind> {
        let mut module = String::new();
        while self.match_punct(Punct::Dot) {
            module.push('.');
        }
        if !self.check_kw(Kw::Import) {
            module.push_str(&self.parse_dotted_name()?);
        }
        self.expect_kw(Kw::Import, "import")?;
        if self.match_punct(Punct::Star) {
            return Ok(StmtKind::ImportFrom {
                module,
                names: vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }],
            });
        }
        let parenthesized = self.match_punct(Punct::LParen);
        let mut names = Vec::new();
        loop {
            if parenthesized && self.check_punct(Punct::RParen) {
                break;
            }
            let name = self.expect_name()?;
            let asname = if self.match_kw(Kw::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect_punct(Punct::RParen, ")")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_testlist(&mut self) -> PResult<Expr> {
        let first = self.parse_test()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_punct(Punct::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_target_list(&mut self) -> PResult<Expr> {
        let first = self.parse_bitor()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_punct(Punct::Comma) {
            if self.check_kw(Kw::In) {
                break;
            }
            items.push(self.parse_bitor()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_test(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        if self.match_kw(Kw::Lambda) {
            return self.parse_lambda();
        }
        let expr = self.parse_or()?;
        if self.match_kw(Kw::If) {
            let test = self.parse_or()?;
            self.expect_kw(Kw::Else, "else")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(expr),
                orelse: Box::new(orelse),
            });
        }
        Ok(expr)
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let mut params = Vec::new();
        while !self.match_punct(Punct::Colon) {
            params.push(self.expect_name()?);
            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::Colon, ":")?;
                break;
            }
        }
        let body = self.parse_test()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let first = self.parse_and()?;
        if !self.check_kw(Kw::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.match_kw(Kw::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::Bool {
            op: BoolOp::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let first = self.parse_not()?;
        if !self.check_kw(Kw::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.match_kw(Kw::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::Bool {
            op: BoolOp::And,
            values,
        })
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.match_kw(Kw::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn match_comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Token::Punct(Punct::EqEq) => CmpOp::Eq,
            Token::Punct(Punct::NotEq) => CmpOp::NotEq,
            Token::Punct(Punct::Lt) => CmpOp::Lt,
            Token::Punct(Punct::LtEq) => CmpOp::LtE,
            Token::Punct(Punct::Gt) => CmpOp::Gt,
            Token::Punct(Punct::GtEq) => CmpOp::GtE,
            Token::Keyword(Kw::In) => CmpOp::In,
            Token::Keyword(Kw::Not) if self.peek_nth(1) == &Token::Keyword(Kw::In) => {
                self.advance();
                CmpOp::NotIn
            }
            Token::Keyword(Kw::Is) => {
                if self.peek_nth(1) == &Token::Keyword(Kw::Not) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.match_comparison_op() {
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_bitand()?;
        while self.match_punct(Punct::Pipe) {
            let right = self.parse_bitand()?;
            expr = Self::binary(expr, BinOp::BitOr, right);
        }
        Ok(expr)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_arith()?;
        while self.match_punct(Punct::Amp) {
            let right = self.parse_arith()?;
            expr = Self::binary(expr, BinOp::BitAnd, right);
        }
        Ok(expr)
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = if self.match_punct(Punct::Plus) {
                BinOp::Add
            } else if self.match_punct(Punct::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            expr = Self::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = if self.match_punct(Punct::Star) {
                BinOp::Mul
            } else if self.match_punct(Punct::Slash) {
                BinOp::Div
            } else if self.match_punct(Punct::DoubleSlash) {
                BinOp::FloorDiv
            } else if self.match_punct(Punct::Percent) {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.parse_factor()?;
            expr = Self::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = if self.match_punct(Punct::Minus) {
            UnaryOp::Neg
        } else if self.match_punct(Punct::Plus) {
            UnaryOp::Pos
        } else if self.match_punct(Punct::Tilde) {
            UnaryOp::Invert
        } else {
            return self.parse_power();
        };
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_primary()?;
        if self.match_punct(Punct::DoubleStar) {
            let exponent = self.nested(Self::parse_factor)?;
            return Ok(Self::binary(base, BinOp::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        if self.match_kw(Kw::Await) {
            return Err(self.error("'await' is not supported"));
        }
        let mut expr = self.parse_atom()?;
        loop {
            if self.match_punct(Punct::Dot) {
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.match_punct(Punct::LParen) {
                let (args, keywords) = self.parse_call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                };
            } else if self.match_punct(Punct::LBracket) {
                let index = self.parse_subscript_list()?;
                self.expect_punct(Punct::RBracket, "]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.match_punct(Punct::RParen) {
            if self.check_punct(Punct::Star) || self.check_punct(Punct::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek(), Token::Name(_))
                && self.peek_nth(1) == &Token::Punct(Punct::Assign);
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                let value = self.parse_test()?;
                keywords.push(Keyword { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.parse_test()?;
                if self.check_kw(Kw::For) {
                    let generators = self.parse_comprehension()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(arg),
                        generators,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, ")")?;
                break;
            }
        }
        Ok((args, keywords))
    }

    fn parse_subscript_list(&mut self) -> PResult<Expr> {
        let first = self.parse_subscript()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_punct(Punct::Comma) {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            items.push(self.parse_subscript()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_bound(&mut self) -> PResult<Option<Box<Expr>>> {
        if self.check_punct(Punct::Colon)
            || self.check_punct(Punct::Comma)
            || self.check_punct(Punct::RBracket)
        {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.parse_test()?)))
        }
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let lower = self.slice_bound()?;
        if !self.match_punct(Punct::Colon) {
            return lower
                .map(|expr| *expr)
                .ok_or_else(|| self.error("invalid subscript"));
        }
        let upper = self.slice_bound()?;
        let step = if self.match_punct(Punct::Colon) {
            self.slice_bound()?
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_comprehension(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.match_kw(Kw::For) {
            let target = self.parse_target_list()?;
            check_target(&target).map_err(|m| self.error(m))?;
            self.expect_kw(Kw::In, "in")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.match_kw(Kw::If) {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            Token::Int(value) => {
                self.advance();
                Ok(Expr::Constant(Constant::Int(value)))
            }
            Token::Float(value) => {
                self.advance();
                Ok(Expr::Constant(Constant::Float(value)))
            }
            Token::Str(_) | Token::FStr(_) => self.parse_strings(line),
            Token::Keyword(Kw::None) => {
                self.advance();
                Ok(Expr::Constant(Constant::None))
            }
            Token::Keyword(Kw::True) => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(true)))
            }
            Token::Keyword(Kw::False) => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(false)))
            }
            Token::Punct(Punct::LParen) => {
                self.advance();
                if self.match_punct(Punct::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.check_kw(Kw::For) {
                    let generators = self.parse_comprehension()?;
                    self.expect_punct(Punct::RParen, ")")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                if !self.check_punct(Punct::Comma) {
                    self.expect_punct(Punct::RParen, ")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.match_punct(Punct::Comma) {
                    if self.check_punct(Punct::RParen) {
                        break;
                    }
                    items.push(self.parse_test()?);
                }
                self.expect_punct(Punct::RParen, ")")?;
                Ok(Expr::Tuple(items))
            }
            Token::Punct(Punct::LBracket) => {
                self.advance();
                if self.match_punct(Punct::RBracket) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.check_kw(Kw::For) {
                    let generators = self.parse_comprehension()?;
                    self.expect_punct(Punct::RBracket, "]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                let mut items = vec![first];
                while self.match_punct(Punct::Comma) {
                    if self.check_punct(Punct::RBracket) {
                        break;
                    }
                    items.push(self.parse_test()?);
                }
                self.expect_punct(Punct::RBracket, "]")?;
                Ok(Expr::List(items))
            }
            Token::Punct(Punct::LBrace) => {
                self.advance();
                if self.match_punct(Punct::RBrace) {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.parse_test()?;
                if !self.match_punct(Punct::Colon) {
                    return Err(self.error("set literals are not supported"));
                }
                let value = self.parse_test()?;
                if self.check_kw(Kw::For) {
                    let generators = self.parse_comprehension()?;
                    self.expect_punct(Punct::RBrace, "}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        generators,
                    });
                }
                let mut pairs = vec![(key, value)];
                while self.match_punct(Punct::Comma) {
                    if self.check_punct(Punct::RBrace) {
                        break;
                    }
                    let key = self.parse_test()?;
                    self.expect_punct(Punct::Colon, ":")?;
                    let value = self.parse_test()?;
                    pairs.push((key, value));
                }
                self.expect_punct(Punct::RBrace, "}")?;
                Ok(Expr::Dict(pairs))
            }
            Token::Newline | Token::Eof => Err(self.error("unexpected end of statement")),
            Token::Indent => Err(self.error("unexpected indent")),
            _ => Err(self.error("invalid syntax")),
        }
    }

    /// Adjacent literals concatenate; any f-string makes the whole run formatted.
    fn parse_strings(&mut self, line: usize) -> PResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Token::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                Token::FStr(text) => {
                    self.advance();
                    formatted = true;
                    for part in parse_fstring(&text, line)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            other => parts.push(other),
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text = parts
            .into_iter()
            .map(|part| match part {
                FStringPart::Literal(text) => text,
                FStringPart::Interpolation { .. } => String::new(),
            })
            .collect::<String>();
        Ok(Expr::Constant(Constant::Str(text)))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn check_target(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_target),
        Expr::Call { .. } => Err("cannot assign to function call".to_string()),
        Expr::Constant(_) => Err("cannot assign to literal".to_string()),
        _ => Err("cannot assign to expression".to_string()),
    }
}

fn exception_names(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Tuple(items) => items
            .iter()
            .map(exception_names)
            .collect::<Result<Vec<_>, _>>()
            .map(|names| names.join(",")),
        other => other
            .dotted_name()
            .ok_or_else(|| "invalid exception type".to_string()),
    }
}

/// Splits f-string text into literal runs and parsed interpolations.
pub fn parse_fstring(text: &str, line: usize) -> PResult<Vec<FStringPart>> {
    let fail = |message: &str| ParseError {
        message: format!("f-string: {message}"),
        line,
    };
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(fail("single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        i += 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr_text = String::new();
        let mut conversion = None;
        let mut format_spec = None;
        loop {
            let Some(&c) = chars.get(i) else {
                return Err(fail("expecting '}'"));
            };
            if let Some(q) = quote {
                expr_text.push(c);
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    expr_text.push(c);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    expr_text.push(c);
                }
                ')' | ']' => {
                    depth = depth.saturating_sub(1);
                    expr_text.push(c);
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    expr_text.push(c);
                }
                '}' => {
                    i += 1;
                    break;
                }
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                    conversion = chars.get(i + 1).copied();
                    i += 2;
                    continue;
                }
                ':' if depth == 0 => {
                    let mut spec = String::new();
                    i += 1;
                    while let Some(&s) = chars.get(i) {
                        if s == '}' {
                            break;
                        }
                        spec.push(s);
                        i += 1;
                    }
                    format_spec = Some(spec);
                    continue;
                }
                _ => expr_text.push(c),
            }
            i += 1;
        }
        if expr_text.trim().is_empty() {
            return Err(fail("empty expression not allowed"));
        }
        if let Some(conv) = conversion {
            if !matches!(conv, 'r' | 's' | 'a') {
                return Err(fail("invalid conversion character"));
            }
        }
        let expr = parse_expression(&expr_text, line)?;
        parts.push(FStringPart::Interpolation {
            expr: Box::new(expr),
            conversion,
            format_spec,
        });
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(source: &str) -> StmtKind {
        parse(source).unwrap().body.remove(0).kind
    }

    #[test]
    fn assignment_chain_and_tuple_targets() {
        match stmt("a, b = 1, 2\n") {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Expr::Tuple(items) if items.len() == 2));
                assert!(matches!(value, Expr::Tuple(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn calls_keep_keywords() {
        match stmt("df.sort_values(by='total', ascending=False)") {
            StmtKind::Expr(Expr::Call { func, keywords, .. }) => {
                assert_eq!(func.dotted_name().as_deref(), Some("df.sort_values"));
                assert_eq!(keywords.len(), 2);
                assert_eq!(keywords[1].name, "ascending");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compound_statements_nest() {
        let program = parse(
            "def f(x, y=2):\n    if x > y:\n        return x\n    elif x == y:\n        pass\n    else:\n        return y\nresult = f(1)\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[1].line, 8);
        match &program.body[0].kind {
            StmtKind::FunctionDef { params, body, .. } => {
                assert_eq!(params.len(), 2);
                assert!(matches!(&body[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fstring_splits_interpolations() {
        let parts = parse_fstring("Total: {total:,.2f} for {name!r} {{x}}", 1).unwrap();
        assert_eq!(parts.len(), 5);
        assert!(matches!(
            &parts[1],
            FStringPart::Interpolation { format_spec: Some(spec), .. } if spec == ",.2f"
        ));
        assert!(matches!(
            &parts[3],
            FStringPart::Interpolation { conversion: Some('r'), .. }
        ));
        assert_eq!(parts[4], FStringPart::Literal(" {x}".into()));
    }

    #[test]
    fn subscripts_slices_and_masks() {
        match stmt("x = df.loc[df['a'] > 1, ['a', 'b']]\n") {
            StmtKind::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(*index, Expr::Tuple(ref items) if items.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        match stmt("y = rows[1:10:2]\n") {
            StmtKind::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(*index, Expr::Slice { step: Some(_), .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comprehensions_and_lambdas() {
        assert!(matches!(
            stmt("xs = [x * 2 for x in range(3) if x != 1]\n"),
            StmtKind::Assign { value: Expr::ListComp { .. }, .. }
        ));
        assert!(matches!(
            stmt("total = sum(v for v in values)\n"),
            StmtKind::Assign { value: Expr::Call { .. }, .. }
        ));
        assert!(matches!(
            stmt("f = lambda a, b: a + b\n"),
            StmtKind::Assign { value: Expr::Lambda { .. }, .. }
        ));
    }

    #[test]
    fn imports_record_aliases() {
        match stmt("from os import path as p, getcwd\n") {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(module, "os");
                assert_eq!(names[0].bound_name(), "p");
                assert_eq!(names[1].bound_name(), "getcwd");
            }
            other => panic!("unexpected {other:?}"),
        }
        match stmt("import os.path\n") {
            StmtKind::Import(names) => assert_eq!(names[0].bound_name(), "os"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("x = 1\ny = 2 +\n").unwrap_err();
        assert_eq!(err.line, 2);
        let err = parse("x = 1\nif x\n    y = 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse("1 = x\n").is_err());
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let shallow = format!("x = {}1{}\n", "(".repeat(20), ")".repeat(20));
        assert!(parse(&shallow).is_ok());

        for depth in [100, 2000, 100_000] {
            let parens = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
            let err = parse(&parens).unwrap_err();
            assert!(err.message.contains("too many nested"), "{err}");
        }

        let unary = format!("x = {}1\n", "-".repeat(100_000));
        let err = parse(&unary).unwrap_err();
        assert_eq!(err.message, "too many nested expressions or blocks");

        let negations = format!("x = {}True\n", "not ".repeat(10_000));
        assert!(parse(&negations).is_err());

        let powers = format!("x = 2{}\n", "**2".repeat(10_000));
        assert!(parse(&powers).is_err());

        let ternary = format!("x = {}0\n", "1 if y else ".repeat(10_000));
        assert!(parse(&ternary).is_err());

        let lambdas = format!("f = {}0\n", "lambda: ".repeat(10_000));
        assert!(parse(&lambdas).is_err());
    }

    #[test]
    fn deep_blocks_and_elif_chains_are_bounded() {
        let mut blocks = String::new();
        for level in 0..200 {
            blocks.push_str(&" ".repeat(level));
            blocks.push_str("if x:\n");
        }
        blocks.push_str(&" ".repeat(200));
        blocks.push_str("pass\n");
        let err = parse(&blocks).unwrap_err();
        assert_eq!(err.message, "too many nested expressions or blocks");

        let mut chain = String::from("if x == 0:\n    pass\n");
        for n in 1..5_000 {
            chain.push_str(&format!("elif x == {n}:\n    pass\n"));
        }
        assert!(parse(&chain).is_err());

        let mut short_chain = String::from("if x == 0:\n    pass\n");
        for n in 1..10 {
            short_chain.push_str(&format!("elif x == {n}:\n    pass\n"));
        }
        assert!(parse(&short_chain).is_ok());
    }
}
