//! Recursive descent parser for snippet programs.

use std::rc::Rc;

use thiserror::Error;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDecl, LogicalOp, Program,
    PropertyKey, SourceLocation, Stmt, TemplatePart, UnaryOp,
};
use super::lexer::{Keyword, LexError, Lexer, Punct, TemplateChunk, Token, TokenKind};

/// Syntax error raised while compiling a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({location})")]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            location: err.location,
        }
    }
}

/// How the top level of a snippet is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// The snippet is the body of an async function: `return` and `await`
    /// are allowed at the top level.
    FunctionBody,
    /// The snippet is a classic script: neither `return` nor `await` may
    /// appear outside a function.
    Script,
}

/// Parse a complete snippet.
///
/// # Errors
/// Returns a [`ParseError`] describing the first syntax error.
pub fn parse(source: &str, mode: ParseMode) -> Result<Program, ParseError> {
    Parser::new(source, mode)?.parse_program()
}

/// Deepest recursion the parser allows before rejecting the snippet.
///
/// A parenthesized or bracketed level costs two; statement blocks cost one.
pub const MAX_NESTING_DEPTH: usize = 4_000;

#[derive(Debug, Clone, Copy)]
struct FunctionContext {
    is_async: bool,
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    /// Innermost function first; empty at script top level.
    functions: Vec<FunctionContext>,
    loop_depth: usize,
    /// Index of the closing bracket for every opening bracket token.
    closers: Vec<Option<usize>>,
    nesting: usize,
}

impl Parser {
    pub fn new(source: &str, mode: ParseMode) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source).tokenize()?;
        let functions = match mode {
            ParseMode::FunctionBody => vec![FunctionContext { is_async: true }],
            ParseMode::Script => Vec::new(),
        };
        Ok(Self::from_tokens(tokens, functions, 0))
    }

    fn from_tokens(tokens: Vec<Token>, functions: Vec<FunctionContext>, nesting: usize) -> Self {
        let closers = match_brackets(&tokens);
        Self {
            tokens,
            position: 0,
            functions,
            loop_depth: 0,
            closers,
            nesting,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // --- Token helpers ---

    fn peek(&self) -> &Token {
        let idx = self.position.min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let idx = (self.position + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn current_location(&self) -> SourceLocation {
        self.peek().location
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.position += 1;
        }
        token
    }

    fn check_punct(&self, punct: Punct) -> bool {
        matches!(self.peek_kind(), TokenKind::Punct(p) if *p == punct)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(n) if n == name)
    }

    fn match_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> Result<(), ParseError> {
        if self.match_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = self.peek();
        let message = match &token.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Ident(name) => format!("Unexpected identifier '{name}'"),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::Str(_) => "Unexpected string".to_string(),
            TokenKind::Template(_) => "Unexpected template string".to_string(),
            other => format!("Unexpected token '{other}'"),
        };
        ParseError {
            message,
            location: token.location,
        }
    }

    fn error_at(message: impl Into<String>, location: SourceLocation) -> ParseError {
        ParseError {
            message: message.into(),
            location,
        }
    }

    /// Consume a statement terminator: `;`, or an implied one before `}`,
    /// end of input, or a line break.
    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        if self.match_punct(Punct::Semicolon) {
            return Ok(());
        }
        if self.check_punct(Punct::RBrace) || self.is_at_end() || self.peek().newline_before {
            return Ok(());
        }
        Err(self.unexpected())
    }

    fn in_async_function(&self) -> bool {
        self.functions.last().is_some_and(|f| f.is_async)
    }

    /// Run `parse` one level deeper, failing once the nesting limit is hit.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(Self::error_at(
                "Program is nested too deeply",
                self.current_location(),
            ));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    /// Left-associative chains deepen the tree without recursing here, so
    /// each link counts against the same limit.
    fn check_chain(&self, chain: usize) -> Result<(), ParseError> {
        if self.nesting + chain >= MAX_NESTING_DEPTH {
            return Err(Self::error_at(
                "Program is nested too deeply",
                self.current_location(),
            ));
        }
        Ok(())
    }

    // --- Statements ---

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ParseError> {
        let location = self.current_location();
        match self.peek_kind().clone() {
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                Ok(Stmt::Block(self.parse_block_body()?))
            }
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var) => {
                let stmt = self.parse_var_decl()?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let decl = self.parse_function_rest(false, true)?;
                Ok(Stmt::Function(decl))
            }
            TokenKind::Ident(name)
                if name == "async"
                    && matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::Function))
                    && !self.tokens[(self.position + 1).min(self.tokens.len() - 1)]
                        .newline_before =>
            {
                self.advance();
                self.advance();
                let decl = self.parse_function_rest(true, true)?;
                Ok(Stmt::Function(decl))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let test = self.parse_expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = self.parse_loop_body()?;
                Ok(Stmt::While { test, body })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = self.parse_loop_body()?;
                if !self.match_keyword(Keyword::While) {
                    return Err(self.unexpected());
                }
                self.expect_punct(Punct::LParen)?;
                let test = self.parse_expression()?;
                self.expect_punct(Punct::RParen)?;
                self.match_punct(Punct::Semicolon);
                Ok(Stmt::DoWhile { body, test })
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.functions.is_empty() {
                    return Err(Self::error_at("Illegal return statement", location));
                }
                let value = if self.check_punct(Punct::Semicolon)
                    || self.check_punct(Punct::RBrace)
                    || self.is_at_end()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(Self::error_at("Illegal break statement", location));
                }
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(Self::error_at(
                        "Illegal continue statement: no surrounding iteration statement",
                        location,
                    ));
                }
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                if self.peek().newline_before {
                    return Err(Self::error_at("Illegal newline after throw", location));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            _ => {
                let expr = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Parse statements up to and including the closing `}`.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            if self.is_at_end() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_braced_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct(Punct::LBrace)?;
        self.parse_block_body()
    }

    fn parse_loop_body(&mut self) -> Result<Box<Stmt>, ParseError> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        Ok(Box::new(body?))
    }

    fn parse_decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Let) => DeclKind::Let,
            TokenKind::Keyword(Keyword::Const) => DeclKind::Const,
            TokenKind::Keyword(Keyword::Var) => DeclKind::Var,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let location = self.current_location();
        let Some(kind) = self.parse_decl_kind() else {
            return Err(self.unexpected());
        };
        let mut declarations = Vec::new();
        loop {
            let name_location = self.current_location();
            let name = self.expect_identifier()?;
            let init = if self.match_punct(Punct::Eq) {
                Some(self.parse_assignment()?)
            } else {
                if kind == DeclKind::Const {
                    return Err(Self::error_at(
                        "Missing initializer in const declaration",
                        name_location,
                    ));
                }
                None
            };
            declarations.push((name, init));
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Stmt::VarDecl {
            kind,
            declarations,
            location,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.match_keyword(Keyword::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;

        // for (const x of xs)
        let is_decl = matches!(
            self.peek_kind(),
            TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var)
        );
        if is_decl
            && matches!(self.peek_nth(1), TokenKind::Ident(_))
            && matches!(self.peek_nth(2), TokenKind::Ident(of) if of == "of")
        {
            let kind = self.parse_decl_kind().unwrap_or(DeclKind::Let);
            let name = self.expect_identifier()?;
            self.advance(); // of
            let iterable = self.parse_assignment()?;
            self.expect_punct(Punct::RParen)?;
            let body = self.parse_loop_body()?;
            return Ok(Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            });
        }

        let init = if self.check_punct(Punct::Semicolon) {
            None
        } else if is_decl {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.expect_punct(Punct::Semicolon)?;
        let test = if self.check_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.check_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_loop_body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let location = self.current_location();
        self.advance();
        let block = self.parse_braced_block()?;
        let mut param = None;
        let mut handler = None;
        if self.match_keyword(Keyword::Catch) {
            if self.match_punct(Punct::LParen) {
                param = Some(self.expect_identifier()?);
                self.expect_punct(Punct::RParen)?;
            }
            handler = Some(self.parse_braced_block()?);
        }
        let finalizer = if self.match_keyword(Keyword::Finally) {
            Some(self.parse_braced_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(Self::error_at("Missing catch or finally after try", location));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // --- Functions ---

    /// Parse `name? (params) { body }` after the `function` keyword.
    fn parse_function_rest(
        &mut self,
        is_async: bool,
        require_name: bool,
    ) -> Result<Rc<FunctionDecl>, ParseError> {
        let name = if let TokenKind::Ident(name) = self.peek_kind().clone() {
            self.advance();
            Some(name)
        } else if require_name {
            return Err(self.unexpected());
        } else {
            None
        };
        self.expect_punct(Punct::LParen)?;
        let params = self.parse_params()?;
        let body = self.parse_function_block(is_async)?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
            is_async,
        }))
    }

    /// Parse a parameter list after its opening `(`, through the closing `)`.
    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        while !self.check_punct(Punct::RParen) {
            params.push(self.expect_identifier()?);
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(params)
    }

    fn parse_function_block(&mut self, is_async: bool) -> Result<Vec<Stmt>, ParseError> {
        self.functions.push(FunctionContext { is_async });
        let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.parse_braced_block();
        self.loop_depth = saved_loop_depth;
        self.functions.pop();
        body
    }

    /// Whether the tokens at the cursor start an arrow function.
    fn at_arrow_function(&self) -> bool {
        let mut offset = 0;
        if matches!(self.peek_nth(0), TokenKind::Ident(a) if a == "async")
            && matches!(self.peek_nth(1), TokenKind::Ident(_) | TokenKind::Punct(Punct::LParen))
        {
            offset = 1;
        }
        match self.peek_nth(offset) {
            TokenKind::Ident(_) => {
                matches!(self.peek_nth(offset + 1), TokenKind::Punct(Punct::Arrow))
            }
            TokenKind::Punct(Punct::LParen) => {
                let open = self.position + offset;
                self.closers
                    .get(open)
                    .copied()
                    .flatten()
                    .is_some_and(|close| {
                        matches!(
                            self.tokens.get(close + 1).map(|t| &t.kind),
                            Some(TokenKind::Punct(Punct::Arrow))
                        )
                    })
            }
            _ => false,
        }
    }

    fn parse_arrow_function(&mut self) -> Result<Expr, ParseError> {
        let is_async = if self.check_ident("async")
            && !matches!(self.peek_nth(1), TokenKind::Punct(Punct::Arrow))
        {
            self.advance();
            true
        } else {
            false
        };
        let params = if self.match_punct(Punct::LParen) {
            self.parse_params()?
        } else {
            vec![self.expect_identifier()?]
        };
        self.expect_punct(Punct::Arrow)?;
        let body = if self.check_punct(Punct::LBrace) {
            FunctionBody::Block(self.parse_function_block(is_async)?)
        } else {
            self.functions.push(FunctionContext { is_async });
            let expr = self.parse_assignment();
            self.functions.pop();
            FunctionBody::Expr(Box::new(expr?))
        };
        Ok(Expr::Function(Rc::new(FunctionDecl {
            name: None,
            params,
            body,
            is_arrow: true,
            is_async,
        })))
    }

    // --- Expressions ---

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        if self.at_arrow_function() {
            return self.parse_arrow_function();
        }

        let location = self.current_location();
        let target = self.parse_conditional()?;
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Eq) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusEq) => AssignOp::Compound(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusEq) => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarEq) => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashEq) => AssignOp::Compound(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentEq) => AssignOp::Compound(BinaryOp::Rem),
            TokenKind::Punct(Punct::StarStarEq) => AssignOp::Compound(BinaryOp::Pow),
            TokenKind::Punct(Punct::AndAndEq) => AssignOp::Logical(LogicalOp::And),
            TokenKind::Punct(Punct::OrOrEq) => AssignOp::Logical(LogicalOp::Or),
            TokenKind::Punct(Punct::QuestionQuestionEq) => AssignOp::Logical(LogicalOp::Nullish),
            _ => return Ok(target),
        };
        if !matches!(
            target,
            Expr::Ident(..) | Expr::Member { optional: false, .. } | Expr::Index { .. }
        ) {
            return Err(Self::error_at(
                "Invalid left-hand side in assignment",
                location,
            ));
        }
        let op_location = self.current_location();
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
            location: op_location,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;
        if !self.match_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    /// Binding power of the binary operator at the cursor.
    fn binary_precedence(&self) -> Option<(u8, BinOrLogical)> {
        let entry = match self.peek_kind() {
            TokenKind::Punct(p) => match p {
                Punct::QuestionQuestion => (1, BinOrLogical::Logical(LogicalOp::Nullish)),
                Punct::OrOr => (2, BinOrLogical::Logical(LogicalOp::Or)),
                Punct::AndAnd => (3, BinOrLogical::Logical(LogicalOp::And)),
                Punct::EqEq => (6, BinOrLogical::Binary(BinaryOp::Eq)),
                Punct::NotEq => (6, BinOrLogical::Binary(BinaryOp::NotEq)),
                Punct::EqEqEq => (6, BinOrLogical::Binary(BinaryOp::StrictEq)),
                Punct::NotEqEq => (6, BinOrLogical::Binary(BinaryOp::StrictNotEq)),
                Punct::Lt => (7, BinOrLogical::Binary(BinaryOp::Lt)),
                Punct::Le => (7, BinOrLogical::Binary(BinaryOp::Le)),
                Punct::Gt => (7, BinOrLogical::Binary(BinaryOp::Gt)),
                Punct::Ge => (7, BinOrLogical::Binary(BinaryOp::Ge)),
                Punct::Plus => (9, BinOrLogical::Binary(BinaryOp::Add)),
                Punct::Minus => (9, BinOrLogical::Binary(BinaryOp::Sub)),
                Punct::Star => (10, BinOrLogical::Binary(BinaryOp::Mul)),
                Punct::Slash => (10, BinOrLogical::Binary(BinaryOp::Div)),
                Punct::Percent => (10, BinOrLogical::Binary(BinaryOp::Rem)),
                Punct::StarStar => (11, BinOrLogical::Binary(BinaryOp::Pow)),
                _ => return None,
            },
            TokenKind::Keyword(Keyword::In) => (7, BinOrLogical::Binary(BinaryOp::In)),
            TokenKind::Keyword(Keyword::Instanceof) => {
                (7, BinOrLogical::Binary(BinaryOp::InstanceOf))
            }
            _ => return None,
        };
        Some(entry)
    }

    /// Precedence climbing over binary and logical operators.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        let mut chain = 0;
        while let Some((precedence, op)) = self.binary_precedence() {
            if precedence < min_precedence {
                break;
            }
            chain += 1;
            self.check_chain(chain)?;
            self.advance();
            // `**` is right-associative; everything else binds left.
            let next_min = if matches!(op, BinOrLogical::Binary(BinaryOp::Pow)) {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_binary(next_min)?;
            lhs = match op {
                BinOrLogical::Binary(op) => Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                BinOrLogical::Logical(op) => Expr::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ParseError> {
        let location = self.current_location();
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        if self.check_punct(Punct::PlusPlus) || self.check_punct(Punct::MinusMinus) {
            let increment = self.check_punct(Punct::PlusPlus);
            self.advance();
            let target = self.parse_unary()?;
            Self::check_update_target(&target, location)?;
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
                location,
            });
        }

        if self.check_ident("await") && self.starts_await_operand() {
            if !self.in_async_function() {
                return Err(Self::error_at(
                    "await is only valid in async functions and the top level bodies of modules",
                    location,
                ));
            }
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Await(Box::new(operand)));
        }

        self.parse_postfix()
    }

    /// `await` is an operator only when an operand follows it.
    fn starts_await_operand(&self) -> bool {
        !matches!(
            self.peek_nth(1),
            TokenKind::Eof
                | TokenKind::Punct(
                    Punct::Semicolon
                        | Punct::RParen
                        | Punct::RBrace
                        | Punct::RBracket
                        | Punct::Comma
                        | Punct::Eq
                        | Punct::Dot
                        | Punct::Colon
                        | Punct::Arrow
                )
        )
    }

    fn check_update_target(target: &Expr, location: SourceLocation) -> Result<(), ParseError> {
        if matches!(target, Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. }) {
            Ok(())
        } else {
            Err(Self::error_at(
                "Invalid left-hand side expression in prefix operation",
                location,
            ))
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let location = self.current_location();
        let expr = self.parse_call_member()?;
        if (self.check_punct(Punct::PlusPlus) || self.check_punct(Punct::MinusMinus))
            && !self.peek().newline_before
        {
            let increment = self.check_punct(Punct::PlusPlus);
            if !matches!(expr, Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. }) {
                return Err(Self::error_at(
                    "Invalid left-hand side expression in postfix operation",
                    location,
                ));
            }
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
                location,
            });
        }
        Ok(expr)
    }

    fn parse_property_name(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                Ok(kw.as_str().to_string())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.check_punct(Punct::RParen) {
            args.push(self.parse_assignment()?);
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.check_keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        let mut chain = 0;
        loop {
            let location = self.current_location();
            chain += 1;
            self.check_chain(chain)?;
            if self.match_punct(Punct::Dot) {
                let property = self.parse_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                    location,
                };
            } else if self.match_punct(Punct::QuestionDot) {
                let property = self.parse_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: true,
                    location,
                };
            } else if self.match_punct(Punct::LBracket) {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    location,
                };
            } else if self.check_punct(Punct::LParen) {
                self.advance();
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    location,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// `new Callee(args)`; the callee is a member chain without calls.
    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_new_inner)
    }

    fn parse_new_inner(&mut self) -> Result<Expr, ParseError> {
        let location = self.current_location();
        self.advance();
        let mut callee = if self.check_keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            let member_location = self.current_location();
            if self.match_punct(Punct::Dot) {
                let property = self.parse_property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property,
                    optional: false,
                    location: member_location,
                };
            } else if self.match_punct(Punct::LBracket) {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket)?;
                callee = Expr::Index {
                    object: Box::new(callee),
                    index: Box::new(index),
                    location: member_location,
                };
            } else {
                break;
            }
        }
        let args = if self.match_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
            location,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                self.parse_template(chunks)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                Ok(Expr::Function(self.parse_function_rest(false, false)?))
            }
            TokenKind::Ident(name)
                if name == "async"
                    && matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::Function)) =>
            {
                self.advance();
                self.advance();
                Ok(Expr::Function(self.parse_function_rest(true, false)?))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if name == "undefined" {
                    return Ok(Expr::Undefined);
                }
                Ok(Expr::Ident(name, token.location))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check_punct(Punct::RBracket) {
                    items.push(self.parse_assignment()?);
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBracket)?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                self.parse_object_literal()
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        let mut props = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            let key = match self.peek_kind().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    PropertyKey::Named(name)
                }
                TokenKind::Keyword(kw) => {
                    self.advance();
                    PropertyKey::Named(kw.as_str().to_string())
                }
                TokenKind::Str(s) => {
                    self.advance();
                    PropertyKey::Named(s)
                }
                TokenKind::Number(n) => {
                    self.advance();
                    PropertyKey::Named(super::value::format_number(n))
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let expr = self.parse_assignment()?;
                    self.expect_punct(Punct::RBracket)?;
                    PropertyKey::Computed(expr)
                }
                _ => return Err(self.unexpected()),
            };

            let value = if self.match_punct(Punct::Colon) {
                self.parse_assignment()?
            } else if self.check_punct(Punct::LParen) {
                // Method shorthand: name() { ... }
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_function_block(false)?;
                let name = match &key {
                    PropertyKey::Named(name) => Some(name.clone()),
                    PropertyKey::Computed(_) => None,
                };
                Expr::Function(Rc::new(FunctionDecl {
                    name,
                    params,
                    body: FunctionBody::Block(body),
                    is_arrow: false,
                    is_async: false,
                }))
            } else {
                // Shorthand: { name }
                match &key {
                    PropertyKey::Named(name) => {
                        Expr::Ident(name.clone(), self.current_location())
                    }
                    PropertyKey::Computed(_) => return Err(self.unexpected()),
                }
            };
            props.push((key, value));
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(Expr::Object(props))
    }

    fn parse_template(&self, chunks: Vec<TemplateChunk>) -> Result<Expr, ParseError> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Expr(source, origin) => {
                    let tokens = Lexer::with_origin(&source, origin).tokenize()?;
                    let mut sub = Self::from_tokens(tokens, self.functions.clone(), self.nesting);
                    let expr = sub.parse_expression()?;
                    if !sub.is_at_end() {
                        return Err(sub.unexpected());
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }
}

/// Pair every opening bracket with its closing bracket in one pass.
fn match_brackets(tokens: &[Token]) -> Vec<Option<usize>> {
    let mut closers = vec![None; tokens.len()];
    let mut open = Vec::new();
    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => open.push(idx),
            TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
                if let Some(start) = open.pop() {
                    closers[start] = Some(idx);
                }
            }
            _ => {}
        }
    }
    closers
}

#[derive(Debug, Clone, Copy)]
enum BinOrLogical {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_script(source: &str) -> Program {
        parse(source, ParseMode::Script).unwrap()
    }

    fn parse_body(source: &str) -> Program {
        parse(source, ParseMode::FunctionBody).unwrap()
    }

    #[test]
    fn test_parses_console_calls_without_semicolons() {
        let program = parse_script("console.log(\"hi\")\nconsole.warn(\"careful\")");
        assert_eq!(program.body.len(), 2);
        assert!(matches!(
            &program.body[0],
            Stmt::Expr(Expr::Call { callee, args, .. })
                if matches!(callee.as_ref(), Expr::Member { property, .. } if property == "log")
                    && args.len() == 1
        ));
    }

    #[test]
    fn test_missing_separator_on_same_line_is_error() {
        let err = parse("let a = 1 let b = 2", ParseMode::Script).unwrap_err();
        assert!(err.message.contains("Unexpected token 'let'"), "{}", err.message);
    }

    #[test]
    fn test_top_level_return_depends_on_mode() {
        assert!(parse("return 1", ParseMode::FunctionBody).is_ok());
        let err = parse("return 1", ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Illegal return statement");
    }

    #[test]
    fn test_top_level_await_depends_on_mode() {
        assert!(parse("await fetch('x')", ParseMode::FunctionBody).is_ok());
        assert!(parse("await fetch('x')", ParseMode::Script).is_err());
        assert!(parse("async function f() { await g() }", ParseMode::Script).is_ok());
    }

    #[test]
    fn test_binary_precedence() {
        let program = parse_body("return 1 + 2 * 3");
        let Stmt::Return(Some(Expr::Binary { op, rhs, .. })) = &program.body[0] else {
            panic!("expected binary return");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.as_ref(), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let program = parse_body("return 2 ** 3 ** 2");
        let Stmt::Return(Some(Expr::Binary { op, rhs, .. })) = &program.body[0] else {
            panic!("expected binary return");
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(rhs.as_ref(), Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn test_arrow_functions() {
        let program = parse_script("const f = (a, b) => a + b; const g = x => { return x }");
        let Stmt::VarDecl { declarations, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Function(decl)) = &declarations[0].1 else {
            panic!("expected arrow");
        };
        assert!(decl.is_arrow);
        assert_eq!(decl.params, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(decl.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn test_arrow_detection_pairs_brackets() {
        let tokens = Lexer::new("f((a), [b]) => 1").tokenize().unwrap();
        let closers = match_brackets(&tokens);
        assert_eq!(closers[1], Some(9));
        assert_eq!(closers[2], Some(4));
        assert_eq!(closers[6], Some(8));
        assert_eq!(closers[3], None);
        assert!(parse("const f = (a, [b]) => a; const g = ((1)) + 2", ParseMode::Script).is_ok());
        assert!(parse("(a, b) =>", ParseMode::Script).is_err());
    }

    #[test]
    fn test_nesting_limit_is_syntax_error() {
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let depth = MAX_NESTING_DEPTH;
                let source = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
                parse(&source, ParseMode::Script).unwrap_err().message
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), "Program is nested too deeply");
    }

    #[test]
    fn test_long_operator_chains_count_toward_nesting_limit() {
        let sum = format!("1{}", " + 1".repeat(MAX_NESTING_DEPTH));
        let err = parse(&sum, ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Program is nested too deeply");

        let members = format!("a{}", ".b".repeat(MAX_NESTING_DEPTH));
        let err = parse(&members, ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Program is nested too deeply");

        let short = format!("1{}", " + 1".repeat(100));
        assert!(parse(&short, ParseMode::Script).is_ok());
    }

    #[test]
    fn test_async_arrow_allows_await() {
        assert!(parse("const f = async () => await g()", ParseMode::Script).is_ok());
        assert!(parse("const f = async x => await x", ParseMode::Script).is_ok());
        assert!(parse("const f = () => await g()", ParseMode::Script).is_err());
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let program = parse_body("return (1 + 2) * 3");
        assert!(matches!(
            &program.body[0],
            Stmt::Return(Some(Expr::Binary { op: BinaryOp::Mul, .. }))
        ));
    }

    #[test]
    fn test_new_error_expression() {
        let program = parse_script("throw new Error(\"boom\")");
        let Stmt::Throw(Expr::New { callee, args, .. }) = &program.body[0] else {
            panic!("expected throw new");
        };
        assert!(matches!(callee.as_ref(), Expr::Ident(name, _) if name == "Error"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_object_literal_forms() {
        let program = parse_body("const a = 1; return { a, b: 2, 'c d': 3, [k]: 4, m() { return 5 } }");
        let Stmt::Return(Some(Expr::Object(props))) = &program.body[1] else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 5);
    }

    #[test]
    fn test_for_loops() {
        let program = parse_script("for (let i = 0; i < 3; i++) {} for (const x of xs) {}");
        assert!(matches!(program.body[0], Stmt::For { .. }));
        assert!(matches!(program.body[1], Stmt::ForOf { .. }));
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        let err = parse("break", ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Illegal break statement");
    }

    #[test]
    fn test_try_requires_catch_or_finally() {
        assert!(parse("try { a() } catch (e) { b(e) }", ParseMode::Script).is_ok());
        assert!(parse("try { a() } catch { b() }", ParseMode::Script).is_ok());
        assert!(parse("try { a() } finally { b() }", ParseMode::Script).is_ok());
        assert!(parse("try { a() }", ParseMode::Script).is_err());
    }

    #[test]
    fn test_template_interpolation_parses_expressions() {
        let program = parse_body("return `n=${1 + 2}`");
        let Stmt::Return(Some(Expr::Template(parts))) = &program.body[0] else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], TemplatePart::Expr(Expr::Binary { .. })));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("1 = 2", ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Invalid left-hand side in assignment");
    }

    #[test]
    fn test_unexpected_end_of_input_location() {
        let err = parse("console.log(", ParseMode::Script).unwrap_err();
        assert_eq!(err.message, "Unexpected end of input");
        assert_eq!(err.location, SourceLocation::new(1, 13));
    }

    #[test]
    fn test_promise_catch_method_name() {
        assert!(parse("p.then(f).catch(g).finally(h)", ParseMode::Script).is_ok());
    }
}
