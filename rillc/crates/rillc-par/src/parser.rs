//! Recursive-descent parser.
//!
//! One token of lookahead, one method per precedence level. Precedence,
//! loosest to tightest:
//!
//! ```text
//! assignment  =
//! logical     or, and, not
//! comparison  == > < >= <=        (non-associative)
//! cast        as
//! additive    + -
//! product     * / %
//! application f a1 a2 ...         (juxtaposition)
//! atoms       literals, paths, ( ), do ... end
//! ```
//!
//! Keyword-led forms (`if`, `when`, `for`, `while`, `let`, `break`,
//! `continue`, `var`, `fun`) are full expressions; inside an operand they
//! must be parenthesised or wrapped in a `do` block.
//!
//! A path (`x`, `x[i]`, `x[i][j]`) used as an r-value is wrapped in a
//! [`Tag::Path`] adapter node; the left side of `=`, the callee of an
//! application and the target of indexing stay bare.

use thiserror::Error;

use rillc_lex::{Lexeme, Token};
use rillc_util::Span;

use crate::ast::{Ast, NodeId, NodeKind, Tag};

/// Errors produced while parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    Expected {
        expected: String,
        found: &'static str,
        span: Span,
    },

    #[error("left-hand side of `=` must be a variable or index path")]
    InvalidAssignTarget { span: Span },

    #[error("integer type width must be 8 or 64")]
    InvalidTypeWidth { span: Span },
}

impl ParseError {
    /// Source location of the error.
    pub fn span(&self) -> Span {
        match self {
            ParseError::Expected { span, .. }
            | ParseError::InvalidAssignTarget { span }
            | ParseError::InvalidTypeWidth { span } => *span,
        }
    }
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a token stream into a populated AST.
///
/// An input containing only `Eof` yields an empty AST (no root), which the
/// driver's REPL treats as a blank line.
pub fn parse(tokens: &[Lexeme]) -> Result<Ast> {
    let mut ast = Ast::new();
    if tokens.is_empty() {
        return Ok(ast);
    }
    let mut parser = Parser::new(tokens);
    if parser.peek() == Token::Eof {
        return Ok(ast);
    }
    let root = parser.expression(&mut ast)?;
    parser.expect_token(Token::Eof, "end of input")?;
    ast.set_root(root);
    Ok(ast)
}

/// The parser state: a token slice and a cursor into it.
pub struct Parser<'t> {
    tokens: &'t [Lexeme],
    pos: usize,
}

impl<'t> Parser<'t> {
    /// Create a parser over `tokens` (which must end with `Eof`).
    pub fn new(tokens: &'t [Lexeme]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> Lexeme {
        let lexeme = self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        lexeme
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: Token, expected: &str) -> Result<Lexeme> {
        if self.peek() == token {
            Ok(self.advance())
        } else {
            Err(self.expected(expected))
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        ParseError::Expected {
            expected: what.to_string(),
            found: self.peek().describe(),
            span: self.peek_span(),
        }
    }

    /// Entry point for a full expression.
    pub fn expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        match self.peek() {
            Token::If => self.if_expression(ast),
            Token::When => self.when_expression(ast),
            Token::For => self.for_loop(ast),
            Token::While => self.while_loop(ast),
            Token::Break => self.loop_exit(ast, Tag::Break),
            Token::Continue => self.loop_exit(ast, Tag::Continue),
            Token::Let => self.let_binding(ast),
            Token::Var => self.var_declaration(ast),
            Token::Fun => self.fun_declaration(ast),
            _ => self.assignment(ast),
        }
    }

    fn if_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::If, "`if`")?;
        let cond = self.expression(ast)?;
        self.expect_token(Token::Then, "`then`")?;
        let then = self.expression(ast)?;
        self.expect_token(Token::Else, "`else`")?;
        let alt = self.expression(ast)?;
        Ok(ast.new_branch(Tag::If, vec![cond, then, alt]))
    }

    fn when_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::When, "`when`")?;
        let cond = self.expression(ast)?;
        self.expect_token(Token::Then, "`then`")?;
        let then = self.expression(ast)?;
        Ok(ast.new_branch(Tag::When, vec![cond, then]))
    }

    fn for_loop(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::For, "`for`")?;
        self.expect_token(Token::Var, "`var`")?;
        let id = self.identifier(ast)?;
        let annotation = self.optional_annotation(ast)?;
        self.expect_token(Token::From, "`from`")?;
        let init = self.expression(ast)?;
        let decl = ast.new_branch(Tag::VarDecl, vec![id, annotation, init]);
        self.expect_token(Token::To, "`to`")?;
        let upto = self.expression(ast)?;
        let step = if self.eat(Token::Step) {
            self.expression(ast)?
        } else {
            ast.new_empty(self.peek_span())
        };
        self.expect_token(Token::Then, "`then`")?;
        let body = self.expression(ast)?;
        Ok(ast.new_branch(Tag::For, vec![decl, upto, step, body]))
    }

    fn while_loop(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::While, "`while`")?;
        let cond = self.expression(ast)?;
        self.expect_token(Token::Then, "`then`")?;
        let body = self.expression(ast)?;
        Ok(ast.new_branch(Tag::While, vec![cond, body]))
    }

    fn loop_exit(&mut self, ast: &mut Ast, tag: Tag) -> Result<NodeId> {
        self.advance();
        let value = self.expression(ast)?;
        Ok(ast.new_branch(tag, vec![value]))
    }

    fn let_binding(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::Let, "`let`")?;
        let mut decls = Vec::new();
        loop {
            let decl = match self.peek() {
                Token::Var => self.var_declaration(ast)?,
                Token::Fun => self.fun_declaration(ast)?,
                _ => return Err(self.expected("`var` or `fun` declaration")),
            };
            decls.push(decl);
            if !self.eat(Token::Comma) {
                break;
            }
        }
        let decls = ast.new_branch(Tag::Block, decls);
        self.expect_token(Token::In, "`in`")?;
        let body = self.expression(ast)?;
        Ok(ast.new_branch(Tag::Let, vec![decls, body]))
    }

    fn var_declaration(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::Var, "`var`")?;
        let id = self.identifier(ast)?;
        let annotation = self.optional_annotation(ast)?;
        self.expect_token(Token::Eq, "`=`")?;
        let init = self.expression(ast)?;
        Ok(ast.new_branch(Tag::VarDecl, vec![id, annotation, init]))
    }

    fn fun_declaration(&mut self, ast: &mut Ast) -> Result<NodeId> {
        self.expect_token(Token::Fun, "`fun`")?;
        let id = self.identifier(ast)?;
        let mut params = Vec::new();
        while matches!(self.peek(), Token::Ident(_)) {
            params.push(self.identifier(ast)?);
        }
        let params = if params.is_empty() {
            ast.new_nullary(Tag::Block, self.peek_span())
        } else {
            ast.new_branch(Tag::Block, params)
        };
        let annotation = self.optional_annotation(ast)?;
        self.expect_token(Token::Eq, "`=`")?;
        let body = self.expression(ast)?;
        Ok(ast.new_branch(Tag::FunDecl, vec![id, params, annotation, body]))
    }

    /// `(":" type-exp)?`, producing `Empty` when absent.
    fn optional_annotation(&mut self, ast: &mut Ast) -> Result<NodeId> {
        if self.eat(Token::Colon) {
            self.type_expression(ast)
        } else {
            Ok(ast.new_empty(self.peek_span()))
        }
    }

    fn type_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let tag = match self.peek() {
            Token::Int => Tag::IntType,
            Token::Uint => Tag::UintType,
            Token::Bool => {
                let span = self.advance().span;
                return Ok(ast.new_nullary(Tag::BoolType, span));
            }
            Token::Nil => {
                let span = self.advance().span;
                return Ok(ast.new_nullary(Tag::NilType, span));
            }
            _ => return Err(self.expected("a type (`int`, `uint`, `bool` or `nil`)")),
        };
        self.advance();
        // optional width literal, e.g. `int 64`
        let width = if let Token::Number(n) = self.peek() {
            let span = self.advance().span;
            if n != 8 && n != 64 {
                return Err(ParseError::InvalidTypeWidth { span });
            }
            ast.new_num(n, span)
        } else {
            ast.new_empty(self.peek_span())
        };
        Ok(ast.new_branch(tag, vec![width]))
    }

    fn assignment(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let lhs = self.or_expression(ast)?;
        if !self.eat(Token::Eq) {
            return Ok(lhs);
        }
        let target = match &ast.node(lhs).kind {
            NodeKind::Branch {
                tag: Tag::Path,
                children,
            } => children[0],
            _ => {
                return Err(ParseError::InvalidAssignTarget {
                    span: ast.node(lhs).span,
                })
            }
        };
        let rhs = self.expression(ast)?;
        Ok(ast.new_branch(Tag::Assign, vec![target, rhs]))
    }

    fn or_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut lhs = self.and_expression(ast)?;
        while self.eat(Token::Or) {
            let rhs = self.and_expression(ast)?;
            lhs = ast.new_branch(Tag::Or, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn and_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut lhs = self.not_expression(ast)?;
        while self.eat(Token::And) {
            let rhs = self.not_expression(ast)?;
            lhs = ast.new_branch(Tag::And, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn not_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        if self.eat(Token::Not) {
            let operand = self.not_expression(ast)?;
            return Ok(ast.new_branch(Tag::Not, vec![operand]));
        }
        self.comparison(ast)
    }

    fn comparison(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let lhs = self.cast_expression(ast)?;
        let tag = match self.peek() {
            Token::EqEq => Tag::Equal,
            Token::Greater => Tag::Greater,
            Token::Less => Tag::Less,
            Token::GreaterEq => Tag::GreaterEq,
            Token::LessEq => Tag::LessEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.cast_expression(ast)?;
        Ok(ast.new_branch(tag, vec![lhs, rhs]))
    }

    fn cast_expression(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut lhs = self.additive(ast)?;
        while self.eat(Token::As) {
            let ty = self.type_expression(ast)?;
            lhs = ast.new_branch(Tag::As, vec![lhs, ty]);
        }
        Ok(lhs)
    }

    fn additive(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut lhs = self.product(ast)?;
        loop {
            let tag = match self.peek() {
                Token::Plus => Tag::Add,
                Token::Minus => Tag::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.product(ast)?;
            lhs = ast.new_branch(tag, vec![lhs, rhs]);
        }
    }

    fn product(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut lhs = self.application(ast)?;
        loop {
            let tag = match self.peek() {
                Token::Star => Tag::Mul,
                Token::Slash => Tag::Div,
                Token::Percent => Tag::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.application(ast)?;
            lhs = ast.new_branch(tag, vec![lhs, rhs]);
        }
    }

    /// Application by juxtaposition: a bare identifier followed by one or
    /// more argument atoms. Anything else falls through to a single atom.
    fn application(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let head = self.atom(ast)?;

        let callee = match &ast.node(head).kind {
            NodeKind::Branch {
                tag: Tag::Path,
                children,
            } => {
                let inner = children[0];
                match ast.node(inner).kind {
                    NodeKind::Id(_) => Some(inner),
                    _ => None,
                }
            }
            _ => None,
        };

        let Some(callee) = callee else {
            return Ok(head);
        };
        if !self.at_atom_start() {
            return Ok(head);
        }

        let mut args = Vec::new();
        while self.at_atom_start() {
            args.push(self.atom(ast)?);
        }
        let args = ast.new_branch(Tag::Block, args);
        Ok(ast.new_branch(Tag::App, vec![callee, args]))
    }

    fn at_atom_start(&self) -> bool {
        matches!(
            self.peek(),
            Token::Number(_)
                | Token::Str(_)
                | Token::Char(_)
                | Token::Ident(_)
                | Token::Nil
                | Token::True
                | Token::False
                | Token::ParenOpen
                | Token::Do
        )
    }

    fn atom(&mut self, ast: &mut Ast) -> Result<NodeId> {
        match self.peek() {
            Token::Number(n) => {
                let span = self.advance().span;
                Ok(ast.new_num(n, span))
            }
            Token::Str(sym) => {
                let span = self.advance().span;
                Ok(ast.new_str(sym, span))
            }
            Token::Char(c) => {
                let span = self.advance().span;
                Ok(ast.new_char(c, span))
            }
            Token::Nil => {
                let span = self.advance().span;
                Ok(ast.new_nil(span))
            }
            Token::True => {
                let span = self.advance().span;
                Ok(ast.new_true(span))
            }
            Token::False => {
                let span = self.advance().span;
                Ok(ast.new_false(span))
            }
            Token::Ident(_) => {
                let path = self.path(ast)?;
                Ok(ast.new_branch(Tag::Path, vec![path]))
            }
            Token::ParenOpen => {
                self.advance();
                let inner = self.expression(ast)?;
                self.expect_token(Token::ParenClose, "`)`")?;
                Ok(inner)
            }
            Token::Do => self.block(ast),
            _ => Err(self.expected("an expression")),
        }
    }

    /// `ID ("[" exp "]")*`, producing a bare `Id` or `At` chain.
    fn path(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let mut node = self.identifier(ast)?;
        while self.eat(Token::BracketOpen) {
            let index = self.expression(ast)?;
            self.expect_token(Token::BracketClose, "`]`")?;
            node = ast.new_branch(Tag::At, vec![node, index]);
        }
        Ok(node)
    }

    fn block(&mut self, ast: &mut Ast) -> Result<NodeId> {
        let begin = self.expect_token(Token::Do, "`do`")?.span;
        let mut stmts = Vec::new();
        while self.peek() != Token::End {
            stmts.push(self.expression(ast)?);
            if !self.eat(Token::Semicolon) {
                break;
            }
        }
        let end = self.expect_token(Token::End, "`end`")?.span;
        if stmts.is_empty() {
            // span of `do end` itself; there are no children to derive it from
            return Ok(ast.new_nullary(Tag::Block, begin.merge(end)));
        }
        Ok(ast.new_branch(Tag::Block, stmts))
    }

    fn identifier(&mut self, ast: &mut Ast) -> Result<NodeId> {
        match self.peek() {
            Token::Ident(sym) => {
                let span = self.advance().span;
                Ok(ast.new_id(sym, span))
            }
            _ => Err(self.expected("an identifier")),
        }
    }
}
