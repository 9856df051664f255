//! A closed, tagged-sum-type AST. No visitor/double-dispatch: every pass is
//! a single tree-walk function that `match`es on the node's variant.

use crate::types::TypeHandle;

/// Every node carries the source byte range it was parsed from, for
/// diagnostics and the source-slice shown alongside semantic errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    And,
    Or,
    Assign,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Integer {
        span: Span,
        text: String,
        /// Filled in by the semantic pass.
        ty: Option<TypeHandle>,
    },
    Identifier {
        span: Span,
        text: String,
        ty: Option<TypeHandle>,
    },
    Unary {
        span: Span,
        op: UnaryOp,
        operand: Box<Expr>,
        ty: Option<TypeHandle>,
    },
    Binary {
        span: Span,
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Option<TypeHandle>,
    },
    Call {
        span: Span,
        callee: Box<Expr>,
        args: Vec<Expr>,
        /// `name(t1,t2,...)`, written by the semantic pass.
        mangled_name: Option<String>,
        ty: Option<TypeHandle>,
    },
    Index {
        span: Span,
        value: Box<Expr>,
        args: Vec<Expr>,
        ty: Option<TypeHandle>,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Integer { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. } => *span,
        }
    }

    pub fn ty(&self) -> Option<TypeHandle> {
        match self {
            Expr::Integer { ty, .. }
            | Expr::Identifier { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Index { ty, .. } => *ty,
        }
    }

    pub fn set_ty(&mut self, handle: TypeHandle) {
        let slot = match self {
            Expr::Integer { ty, .. }
            | Expr::Identifier { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Index { ty, .. } => ty,
        };
        *slot = Some(handle);
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block {
        span: Span,
        stmts: Vec<Stmt>,
    },
    Var {
        span: Span,
        names: Vec<String>,
        inits: Vec<Expr>,
    },
    Return {
        span: Span,
        expr: Expr,
    },
    While {
        span: Span,
        cond: Expr,
        body: Box<Stmt>,
    },
    If {
        span: Span,
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    /// An expression in statement position.
    Expr {
        span: Span,
        expr: Expr,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Block { span, .. }
            | Stmt::Var { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::While { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Expr { span, .. } => *span,
        }
    }
}

/// An unresolved type name as written in source: an identifier optionally
/// followed by a postfix chain of `*` (pointer) and `[]` (array),
/// left-associative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named(String),
    Pointer(Box<TypeExpr>),
    Array(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub type_expr: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub span: Span,
    pub name: String,
    pub result_type: TypeExpr,
    pub params: Vec<Param>,
    pub body: Stmt,
    /// Populated by the semantic pass: name -> resolved type, including
    /// parameters and every `Var` declaration in the body.
    pub locals: Vec<(String, TypeHandle)>,
    /// Populated by the semantic pass: the mangled, signature-qualified
    /// name this declaration is emitted and linked under.
    pub mangled_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub decls: Vec<FunctionDecl>,
}
