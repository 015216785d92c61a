//! Static resolution pass.
//!
//! Computes for every local variable reference (including `this` and `super`) how many scopes
//! separate it from its declaration, and reports misplaced `return`/`this`/`super`,
//! redeclarations, self-referencing initializers and unused locals.  References that match no
//! enclosing scope are globals and get no resolution.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{ClassDecl, Expr, ExprId, FunctionDecl, Stmt};
use crate::ctx::Context;
use crate::diag::{Diagnostics, StaticError};
use crate::interner::Symbol;
use crate::stack::ensure_sufficient_stack;
use crate::token::Token;

/// Scope depth of each resolved local reference.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Resolutions(HashMap<ExprId, usize>);

impl Resolutions {
    pub fn new() -> Resolutions {
        Resolutions::default()
    }

    /// Number of scopes to walk up from the current environment, or `None` for a global.
    pub fn depth(&self, id: ExprId) -> Option<usize> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge resolutions computed for another chunk of the same session.
    pub fn extend(&mut self, other: Resolutions) {
        self.0.extend(other.0)
    }
}

/// Resolve `program`, reporting static errors to `diags`.
///
/// The AST is not modified so resolving the same program again yields equal resolutions.
#[tracing::instrument(level = "debug", skip_all)]
pub fn resolve(program: &[Stmt], ctx: &Rc<Context>, diags: &mut Diagnostics) -> Resolutions {
    let mut resolver = Resolver {
        ctx: ctx.clone(),
        diags,
        scopes: vec![],
        resolutions: Resolutions::new(),
        function: FunctionType::None,
        class: ClassType::None,
    };
    resolver.resolve_stmts(program);
    tracing::debug!(resolved = resolver.resolutions.len(), "resolved");
    resolver.resolutions
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
    /// Inside a class method, where `this` is the class itself.
    Metaclass,
}

#[derive(Debug)]
struct Binding {
    token: Token,
    defined: bool,
    used: bool,
    /// Parameters and implicit bindings are never reported as unused.
    exempt: bool,
}

type Scope = HashMap<Symbol, Binding>;

struct Resolver<'a> {
    ctx: Rc<Context>,
    diags: &'a mut Diagnostics,
    scopes: Vec<Scope>,
    resolutions: Resolutions,
    function: FunctionType,
    class: ClassType,
}

impl<'a> Resolver<'a> {
    fn resolve_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        ensure_sufficient_stack(|| match stmt {
            Stmt::Expr(e) => self.resolve_expr(e),
            Stmt::Var { name, init } => {
                self.declare(name);
                if let Some(init) = init {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            Stmt::Fun(decl) => {
                self.declare(&decl.name);
                self.define(&decl.name);
                self.resolve_function(decl, FunctionType::Function);
            }
            Stmt::Class(decl) => self.resolve_class(decl),
            Stmt::Block(stmts) => {
                self.begin_scope();
                self.resolve_stmts(stmts);
                self.end_scope();
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(cond);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            Stmt::While { cond, body } => {
                self.resolve_expr(cond);
                self.resolve_stmt(body);
            }
            // Escaping every loop is detected at run time.
            Stmt::Break(_) => (),
            Stmt::Return { keyword, value } => {
                if self.function == FunctionType::None {
                    self.diags
                        .error_at(keyword, StaticError::ReturnOutsideFunction);
                }
                if let Some(value) = value {
                    if self.function == FunctionType::Initializer {
                        self.diags.error_at(keyword, StaticError::ReturnValueFromInit);
                    }
                    self.resolve_expr(value);
                }
            }
        })
    }

    fn resolve_class(&mut self, decl: &ClassDecl) {
        self.declare(&decl.name);
        self.define(&decl.name);

        if let Some(superclass) = &decl.superclass {
            if superclass.name.symbol() == decl.name.symbol() {
                self.diags
                    .error_at(&superclass.name, StaticError::SelfInheritance);
            }
            self.resolve_local(superclass.id, &superclass.name);
        }

        let enclosing_class = self.class;

        self.class = if decl.superclass.is_some() {
            ClassType::Subclass
        } else {
            ClassType::Class
        };
        self.begin_scope();
        self.define_implicit(self.ctx.this_sym.clone(), &decl.name);
        if decl.superclass.is_some() {
            self.define_implicit(self.ctx.super_sym.clone(), &decl.name);
        }
        for method in decl.methods.iter() {
            self.define_method_name(method);
        }
        for method in decl.methods.iter() {
            let kind = if method.name.symbol() == Some(&self.ctx.init_sym) {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, kind);
        }
        self.end_scope();

        self.class = ClassType::Metaclass;
        self.begin_scope();
        self.define_implicit(self.ctx.this_sym.clone(), &decl.name);
        for method in decl.class_methods.iter() {
            self.define_method_name(method);
        }
        for method in decl.class_methods.iter() {
            self.resolve_function(method, FunctionType::Method);
        }
        self.end_scope();

        self.class = enclosing_class;
    }

    fn define_method_name(&mut self, method: &FunctionDecl) {
        if let Some(sym) = method.name.symbol() {
            self.define_implicit(sym.clone(), &method.name);
        }
    }

    /// Parameters and body share one scope, which the evaluator mirrors with a single call
    /// environment.
    fn resolve_function(&mut self, decl: &FunctionDecl, kind: FunctionType) {
        let enclosing = self.function;
        self.function = kind;

        self.begin_scope();
        for param in decl.params.iter() {
            self.declare(param);
            self.define(param);
            self.exempt(param);
        }
        self.resolve_stmts(&decl.body);
        self.end_scope();

        self.function = enclosing;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        ensure_sufficient_stack(|| match expr {
            Expr::Literal(_) => (),
            Expr::Variable(var) => {
                let uninitialized = var
                    .name
                    .symbol()
                    .and_then(|sym| self.scopes.last().and_then(|scope| scope.get(sym)))
                    .map_or(false, |binding| !binding.defined);
                if uninitialized {
                    self.diags.error_at(&var.name, StaticError::SelfInitializer);
                }
                self.resolve_local(var.id, &var.name);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }
            Expr::FieldAssign { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }
            Expr::ListAssign {
                list, index, value, ..
            } => {
                self.resolve_expr(list);
                self.resolve_expr(index);
                self.resolve_expr(value);
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                self.resolve_expr(cond);
                self.resolve_expr(then_expr);
                self.resolve_expr(else_expr);
            }
            Expr::Grouping(e) => self.resolve_expr(e),
            Expr::List(elements) => {
                for e in elements {
                    self.resolve_expr(e);
                }
            }
            Expr::ListAccess { list, index, .. } => {
                self.resolve_expr(list);
                self.resolve_expr(index);
            }
            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                for a in args {
                    self.resolve_expr(a);
                }
            }
            Expr::Lambda(decl) => self.resolve_function(decl, FunctionType::Function),
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::This { id, keyword } => {
                if self.class == ClassType::None {
                    self.diags.error_at(keyword, StaticError::ThisOutsideClass);
                } else {
                    self.resolve_local(*id, keyword);
                }
            }
            Expr::Super { id, keyword, .. } => match self.class {
                ClassType::None => self.diags.error_at(keyword, StaticError::SuperOutsideClass),
                ClassType::Class => self
                    .diags
                    .error_at(keyword, StaticError::SuperWithoutSuperclass),
                ClassType::Metaclass => {
                    self.diags.error_at(keyword, StaticError::SuperInClassMethod)
                }
                ClassType::Subclass => self.resolve_local(*id, keyword),
            },
        })
    }

    /// Record the depth of the innermost scope declaring `name`.  Reading or assigning both
    /// count as a use.
    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        let sym = match name.symbol() {
            Some(sym) => sym.clone(),
            None if name.lexeme.as_ref() == "this" => self.ctx.this_sym.clone(),
            None if name.lexeme.as_ref() == "super" => self.ctx.super_sym.clone(),
            None => return,
        };
        for (depth, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(binding) = scope.get_mut(&sym) {
                binding.used = true;
                self.resolutions.0.insert(id, depth);
                return;
            }
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    fn end_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            let mut unused: Vec<&Binding> = scope
                .values()
                .filter(|b| !b.used && !b.exempt)
                .collect();
            unused.sort_by(|a, b| {
                a.token
                    .line
                    .cmp(&b.token.line)
                    .then_with(|| a.token.lexeme.cmp(&b.token.lexeme))
            });
            for binding in unused {
                self.diags.error_at(
                    &binding.token,
                    StaticError::UnusedVariable(binding.token.lexeme.to_string()),
                );
            }
        }
    }

    fn declare(&mut self, name: &Token) {
        let sym = match name.symbol() {
            Some(sym) => sym.clone(),
            None => return,
        };
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&sym) {
                self.diags.error_at(name, StaticError::Redeclaration);
            }
            scope.insert(
                sym,
                Binding {
                    token: name.clone(),
                    defined: false,
                    used: false,
                    exempt: false,
                },
            );
        }
    }

    fn define(&mut self, name: &Token) {
        if let (Some(sym), Some(scope)) = (name.symbol(), self.scopes.last_mut()) {
            if let Some(binding) = scope.get_mut(sym) {
                binding.defined = true;
            }
        }
    }

    fn exempt(&mut self, name: &Token) {
        if let (Some(sym), Some(scope)) = (name.symbol(), self.scopes.last_mut()) {
            if let Some(binding) = scope.get_mut(sym) {
                binding.exempt = true;
            }
        }
    }

    fn define_implicit(&mut self, sym: Symbol, token: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                sym,
                Binding {
                    token: token.clone(),
                    defined: true,
                    used: false,
                    exempt: true,
                },
            );
        }
    }
}
