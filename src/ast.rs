use std::rc::Rc;

use crate::token::{Literal, Token};

/// Identity of an expression node the resolver annotates with a scope depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

#[derive(Debug, PartialEq, Clone)]
pub enum Stmt {
    Expr(Expr),
    Var {
        name: Token,
        init: Option<Expr>,
    },
    Fun(Rc<FunctionDecl>),
    Class(Rc<ClassDecl>),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Break(Token),
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Literal(Literal),
    Variable(Variable),
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
    },
    FieldAssign {
        object: Box<Expr>,
        field: Token,
        value: Box<Expr>,
    },
    ListAssign {
        list: Box<Expr>,
        bracket: Token,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    Unary {
        op: Token,
        operand: Box<Expr>,
    },
    /// Arithmetic, comparison, equality, `and`/`or` (short-circuiting), the comma operator and
    /// the desugared `++`/`--`.
    Binary {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        question: Token,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Grouping(Box<Expr>),
    List(Vec<Expr>),
    ListAccess {
        list: Box<Expr>,
        bracket: Token,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        paren: Token,
        args: Vec<Expr>,
    },
    Lambda(Rc<FunctionDecl>),
    Get {
        object: Box<Expr>,
        name: Token,
    },
    This {
        id: ExprId,
        keyword: Token,
    },
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },
}

/// Reference to a variable by name.
#[derive(Debug, PartialEq, Clone)]
pub struct Variable {
    pub id: ExprId,
    pub name: Token,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FunctionKind {
    Function,
    Lambda,
    Method,
    /// Method declared without a parameter list, invoked on property access.
    Getter,
}

/// Declaration shared by named functions, lambdas and methods.
///
/// Lambdas are named after their `fun` keyword token.
#[derive(Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
    pub kind: FunctionKind,
}

#[derive(Debug, PartialEq)]
pub struct ClassDecl {
    pub name: Token,
    pub superclass: Option<Variable>,
    pub methods: Vec<Rc<FunctionDecl>>,
    pub class_methods: Vec<Rc<FunctionDecl>>,
}
