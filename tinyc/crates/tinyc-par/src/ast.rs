//! AST node definitions.
//!
//! Nodes live in typed-index arenas on [`Ast`]; tree edges are [`ExprId`] and
//! [`StmtId`] handles. Later passes annotate nodes through side tables keyed
//! by these ids rather than by mutating the tree, so the AST itself stays
//! immutable after parsing.

use tinyc_util::{define_idx, IndexVec, Pos, Str};

define_idx!(
    /// Handle to an expression node.
    ExprId
);

define_idx!(
    /// Handle to a statement node.
    StmtId
);

/// A parsed module: the node arenas plus the top-level items in source order.
#[derive(Debug, Default)]
pub struct Ast {
    pub exprs: IndexVec<ExprId, Expr>,
    pub stmts: IndexVec<StmtId, Stmt>,
    pub items: Vec<Item>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id]
    }
}

/// A top-level item.
#[derive(Debug)]
pub enum Item {
    Struct(StructDecl),
    Import(ImportDecl),
    Func(FuncDecl),
    /// An executable top-level statement.
    Stmt(StmtId),
}

/// `struct Name { field: Type ... }`
#[derive(Debug)]
pub struct StructDecl {
    pub name: Str,
    pub fields: Vec<FieldDecl>,
    pub pos: Pos,
}

/// A single struct field.
#[derive(Debug)]
pub struct FieldDecl {
    pub name: Str,
    pub ty: TypeSpec,
}

/// `import name`
#[derive(Debug)]
pub struct ImportDecl {
    pub module: Str,
    pub pos: Pos,
}

/// `func name(a: T, ...) [: R] body`
#[derive(Debug)]
pub struct FuncDecl {
    pub name: Str,
    pub params: Vec<Param>,
    /// Declared return type; `None` means void.
    pub ret: Option<TypeSpec>,
    pub body: StmtId,
    pub pos: Pos,
}

/// A function parameter.
#[derive(Debug)]
pub struct Param {
    pub name: Str,
    pub ty: TypeSpec,
    pub pos: Pos,
}

/// A type written in source. Always a bare name; resolution to a concrete
/// type tag happens during checking so forward references to structs work.
#[derive(Debug, Clone, Copy)]
pub struct TypeSpec {
    pub name: Str,
    pub pos: Pos,
}

/// An expression node.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

/// Expression shapes.
#[derive(Debug)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Float(f32),
    Str(Str),

    /// A variable, constant, or module reference.
    Id(Str),

    /// `callee(args...)`
    Call { callee: Str, args: Vec<ExprId> },

    /// `(inner)`
    Paren(ExprId),

    /// `-operand` or `!operand`
    Unary { op: UnOp, operand: ExprId },

    /// `lhs op rhs`
    Binary { op: BinOp, lhs: ExprId, rhs: ExprId },

    /// `lhs.field`
    Dot { lhs: ExprId, field: Str },

    /// `new T{args...}`
    Constructor { ty: TypeSpec, args: Vec<ExprId> },

    /// `cast(value, T)`
    Cast { value: ExprId, ty: TypeSpec },
}

/// A statement node.
#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

/// Statement shapes.
#[derive(Debug)]
pub enum StmtKind {
    /// `{ stmts... }`
    Block(Vec<StmtId>),

    /// A call in statement position.
    Expr(ExprId),

    /// `name := init` or `name : T = init`
    Declare {
        name: Str,
        ty: Option<TypeSpec>,
        init: ExprId,
    },

    /// `name :: literal`
    DeclareConst { name: Str, value: ExprId },

    /// `target = value`, or `target op= value` when `op` is set.
    Assign {
        target: ExprId,
        op: Option<BinOp>,
        value: ExprId,
    },

    /// `if cond body [else alt]`
    If {
        cond: ExprId,
        body: StmtId,
        alt: Option<StmtId>,
    },

    /// `while cond body`
    While { cond: ExprId, body: StmtId },

    /// `for init; cond; step body`
    For {
        init: StmtId,
        cond: ExprId,
        step: StmtId,
        body: StmtId,
    },

    /// `return` or `return expr`
    Return { value: Option<ExprId> },

    Break,
    Continue,
}

/// Binary operators, in source form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
    LogAnd,
    LogOr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}
