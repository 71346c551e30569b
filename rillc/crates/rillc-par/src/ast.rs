//! The AST arena.
//!
//! Nodes live in a single arena and refer to each other by [`NodeId`].
//! Construction maintains three invariants:
//!
//! - a child's id is always smaller than its parent's (children are
//!   allocated first),
//! - a branch node's span runs from its first child's begin to its last
//!   child's end, and appends/prepends extend the matching end,
//! - each child's `parent` back-reference is set on attachment.
//!
//! `Empty` nodes stand in for optional children (type annotations, the
//! `step` of a `for` loop) so every branch has a fixed arity.

use std::io::{self, Write};

use rillc_util::{define_idx, IndexVec, Span, StringPool, Symbol};

define_idx!(NodeId);

/// Branch node tags. Children and arities are fixed per tag:
///
/// | Tag        | Children                              |
/// |------------|---------------------------------------|
/// | `Block`    | n >= 0 statements (value = last)      |
/// | `If`       | cond, then, else                      |
/// | `When`     | cond, then                            |
/// | `For`      | decl, upto, step-or-Empty, body       |
/// | `While`    | cond, body                            |
/// | `Break`    | value expression                      |
/// | `Continue` | value expression                      |
/// | `Assign`   | lvalue path, rvalue                   |
/// | `At`       | base, index                           |
/// | `Path`     | single child (r-value adapter)        |
/// | `Let`      | decl block, body                      |
/// | `VarDecl`  | id, type-or-Empty, init               |
/// | `FunDecl`  | id, params block, type-or-Empty, body |
/// | `App`      | callee id, args block                 |
/// | `As`       | expr, type expr                       |
/// | binary ops | two children (`Not`: one)             |
/// | `IntType`  | width-or-Empty                        |
/// | `UintType` | width-or-Empty                        |
/// | `BoolType` | none                                  |
/// | `NilType`  | none                                  |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Block,
    App,
    If,
    When,
    For,
    While,
    Break,
    Continue,
    Assign,
    Or,
    And,
    Not,
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Equal,
    At,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    VarDecl,
    FunDecl,
    Let,
    Path,
    As,
    IntType,
    UintType,
    BoolType,
    NilType,
}

impl Tag {
    /// Fixed textual representation used by the s-expression printer.
    pub fn repr(self) -> &'static str {
        match self {
            Tag::Block => "block",
            Tag::App => "app",
            Tag::If => "if",
            Tag::When => "when",
            Tag::For => "for",
            Tag::While => "while",
            Tag::Break => "break",
            Tag::Continue => "continue",
            Tag::Assign => "=",
            Tag::Or => "or",
            Tag::And => "and",
            Tag::Not => "not",
            Tag::Greater => ">",
            Tag::Less => "<",
            Tag::GreaterEq => ">=",
            Tag::LessEq => "<=",
            Tag::Equal => "==",
            Tag::At => "at",
            Tag::Add => "+",
            Tag::Sub => "-",
            Tag::Mul => "*",
            Tag::Div => "/",
            Tag::Mod => "%",
            Tag::VarDecl => "var",
            Tag::FunDecl => "fun",
            Tag::Let => "let",
            Tag::Path => "path",
            Tag::As => "as",
            Tag::IntType => "int",
            Tag::UintType => "uint",
            Tag::BoolType => "bool",
            Tag::NilType => "nil",
        }
    }
}

/// What a node is: a leaf literal or a tagged branch with ordered children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Num(i64),
    Char(u8),
    Str(Symbol),
    Id(Symbol),
    True,
    False,
    Nil,
    /// Placeholder for optional children.
    Empty,
    Branch { tag: Tag, children: Vec<NodeId> },
}

/// A single node: kind, source span and parent back-reference.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parent: Option<NodeId>,
}

/// The arena of nodes with a designated root.
#[derive(Debug)]
pub struct Ast {
    nodes: IndexVec<NodeId, Node>,
    root: Option<NodeId>,
}

impl Ast {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            nodes: IndexVec::new(),
            root: None,
        }
    }

    /// The root node set by the parser.
    ///
    /// # Panics
    ///
    /// Panics if parsing never set a root.
    pub fn root(&self) -> NodeId {
        self.root.expect("AST root not set")
    }

    /// Designate the root node.
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Returns true if no root was ever set (e.g. an empty REPL line).
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Access a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// A branch node's children.
    ///
    /// # Panics
    ///
    /// Panics if `id` is a leaf.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Branch { children, .. } => children,
            other => panic!("children() on leaf node {other:?}"),
        }
    }

    /// Shorthand for the `i`-th child of a branch node.
    pub fn child(&self, id: NodeId, i: usize) -> NodeId {
        self.children(id)[i]
    }

    fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.nodes.push(Node {
            kind,
            span,
            parent: None,
        })
    }

    /// Allocate a number literal.
    pub fn new_num(&mut self, value: i64, span: Span) -> NodeId {
        self.alloc(NodeKind::Num(value), span)
    }

    /// Allocate a character literal.
    pub fn new_char(&mut self, value: u8, span: Span) -> NodeId {
        self.alloc(NodeKind::Char(value), span)
    }

    /// Allocate a string literal.
    pub fn new_str(&mut self, sym: Symbol, span: Span) -> NodeId {
        self.alloc(NodeKind::Str(sym), span)
    }

    /// Allocate an identifier.
    pub fn new_id(&mut self, sym: Symbol, span: Span) -> NodeId {
        self.alloc(NodeKind::Id(sym), span)
    }

    /// Allocate `true`.
    pub fn new_true(&mut self, span: Span) -> NodeId {
        self.alloc(NodeKind::True, span)
    }

    /// Allocate `false`.
    pub fn new_false(&mut self, span: Span) -> NodeId {
        self.alloc(NodeKind::False, span)
    }

    /// Allocate `nil`.
    pub fn new_nil(&mut self, span: Span) -> NodeId {
        self.alloc(NodeKind::Nil, span)
    }

    /// Allocate an `Empty` placeholder.
    pub fn new_empty(&mut self, span: Span) -> NodeId {
        self.alloc(NodeKind::Empty, span)
    }

    /// Allocate a branch with at least one child.
    ///
    /// The branch's span runs from the first child's begin to the last
    /// child's end; each child's parent back-reference is set.
    pub fn new_branch(&mut self, tag: Tag, children: Vec<NodeId>) -> NodeId {
        assert!(!children.is_empty(), "new_branch requires children");
        let begin = self.nodes[children[0]].span;
        let end = self.nodes[*children.last().unwrap()].span;
        let span = begin.merge(end);
        let id = self.alloc(NodeKind::Branch { tag, children }, span);
        self.set_parents(id);
        id
    }

    /// Allocate a childless branch with an explicit span (`do end`,
    /// primitive type expressions).
    pub fn new_nullary(&mut self, tag: Tag, span: Span) -> NodeId {
        self.alloc(
            NodeKind::Branch {
                tag,
                children: Vec::new(),
            },
            span,
        )
    }

    /// Allocate an empty list node (a `Block` awaiting children).
    pub fn new_list(&mut self) -> NodeId {
        self.new_nullary(Tag::Block, Span::DUMMY)
    }

    /// Append `child` to a list node, extending the list's end position.
    pub fn list_append(&mut self, list: NodeId, child: NodeId) {
        let child_span = self.nodes[child].span;
        let node = &mut self.nodes[list];
        match &mut node.kind {
            NodeKind::Branch { children, .. } => {
                if children.is_empty() {
                    node.span = child_span;
                } else {
                    node.span.end = child_span.end;
                }
                children.push(child);
            }
            other => panic!("list_append on non-list node {other:?}"),
        }
        self.nodes[child].parent = Some(list);
    }

    /// Prepend `child` to a list node, extending the list's begin position.
    pub fn list_prepend(&mut self, list: NodeId, child: NodeId) {
        let child_span = self.nodes[child].span;
        let node = &mut self.nodes[list];
        match &mut node.kind {
            NodeKind::Branch { children, .. } => {
                if children.is_empty() {
                    node.span = child_span;
                } else {
                    node.span.begin = child_span.begin;
                }
                children.insert(0, child);
            }
            other => panic!("list_prepend on non-list node {other:?}"),
        }
        self.nodes[child].parent = Some(list);
    }

    fn set_parents(&mut self, id: NodeId) {
        let children = match &self.nodes[id].kind {
            NodeKind::Branch { children, .. } => children.clone(),
            _ => return,
        };
        for child in children {
            self.nodes[child].parent = Some(id);
        }
    }

    /// Print the tree rooted at `id` in s-expression form.
    pub fn write_sexp(
        &self,
        id: NodeId,
        pool: &StringPool,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        self.write_sexp_indented(id, pool, out, 0)
    }

    fn write_sexp_indented(
        &self,
        id: NodeId,
        pool: &StringPool,
        out: &mut dyn Write,
        indent: usize,
    ) -> io::Result<()> {
        match &self.nodes[id].kind {
            NodeKind::Num(n) => write!(out, "{n}"),
            NodeKind::Char(c) => write!(out, "'{}'", *c as char),
            NodeKind::Str(sym) => {
                write!(out, "\"")?;
                for c in pool.find(*sym).chars() {
                    match c {
                        '\n' => write!(out, "\\n")?,
                        '\t' => write!(out, "\\t")?,
                        other => write!(out, "{other}")?,
                    }
                }
                write!(out, "\"")
            }
            NodeKind::Id(sym) => write!(out, "{}", pool.find(*sym)),
            NodeKind::True => write!(out, "true"),
            NodeKind::False => write!(out, "false"),
            NodeKind::Nil => write!(out, "nil"),
            NodeKind::Empty => Ok(()),
            NodeKind::Branch { tag, children } => {
                if *tag == Tag::Path {
                    return self.write_sexp_indented(children[0], pool, out, indent);
                }
                write!(out, "({}", tag.repr())?;
                for &child in children {
                    writeln!(out)?;
                    write!(out, "{}", " ".repeat(indent + 2))?;
                    self.write_sexp_indented(child, pool, out, indent + 2)?;
                }
                write!(out, ")")
            }
        }
    }
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rillc_util::Position;

    fn sp(a: usize, b: usize) -> Span {
        Span::new(Position::new(a, 0, a as u32), Position::new(b, 0, b as u32))
    }

    #[test]
    fn branch_span_covers_children() {
        let mut ast = Ast::new();
        let a = ast.new_num(1, sp(0, 1));
        let b = ast.new_num(2, sp(4, 5));
        let add = ast.new_branch(Tag::Add, vec![a, b]);

        let span = ast.node(add).span;
        assert_eq!(span.begin.offset, 0);
        assert_eq!(span.end.offset, 5);
        assert!(span.contains(ast.node(a).span));
        assert!(span.contains(ast.node(b).span));
    }

    #[test]
    fn children_allocated_before_parent() {
        let mut ast = Ast::new();
        let a = ast.new_num(1, sp(0, 1));
        let b = ast.new_num(2, sp(2, 3));
        let add = ast.new_branch(Tag::Add, vec![a, b]);
        assert!(a < add);
        assert!(b < add);
    }

    #[test]
    fn parent_backrefs_set_on_attach() {
        let mut ast = Ast::new();
        let a = ast.new_num(1, sp(0, 1));
        let b = ast.new_num(2, sp(2, 3));
        let add = ast.new_branch(Tag::Add, vec![a, b]);
        assert_eq!(ast.node(a).parent, Some(add));
        assert_eq!(ast.node(b).parent, Some(add));
    }

    #[test]
    fn list_append_extends_end() {
        let mut ast = Ast::new();
        let list = ast.new_list();
        let a = ast.new_num(1, sp(0, 1));
        let b = ast.new_num(2, sp(4, 5));
        ast.list_append(list, a);
        ast.list_append(list, b);

        let span = ast.node(list).span;
        assert_eq!(span.begin.offset, 0);
        assert_eq!(span.end.offset, 5);
        assert_eq!(ast.children(list), &[a, b]);
    }

    #[test]
    fn list_prepend_extends_begin() {
        let mut ast = Ast::new();
        let list = ast.new_list();
        let b = ast.new_num(2, sp(4, 5));
        let a = ast.new_num(1, sp(0, 1));
        ast.list_append(list, b);
        ast.list_prepend(list, a);

        let span = ast.node(list).span;
        assert_eq!(span.begin.offset, 0);
        assert_eq!(span.end.offset, 5);
        assert_eq!(ast.children(list), &[a, b]);
    }

    #[test]
    fn sexp_prints_leaves_and_branches() {
        let mut pool = StringPool::new();
        let mut ast = Ast::new();
        let x = pool.intern("x");
        let id = ast.new_id(x, sp(0, 1));
        let n = ast.new_num(4, sp(4, 5));
        let add = ast.new_branch(Tag::Add, vec![id, n]);

        let mut buf = Vec::new();
        ast.write_sexp(add, &pool, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "(+\n  x\n  4)");
    }

    #[test]
    fn path_prints_transparently() {
        let mut pool = StringPool::new();
        let mut ast = Ast::new();
        let x = pool.intern("x");
        let id = ast.new_id(x, sp(0, 1));
        let path = ast.new_branch(Tag::Path, vec![id]);

        let mut buf = Vec::new();
        ast.write_sexp(path, &pool, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "x");
    }
}
