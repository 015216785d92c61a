use std::collections::HashMap;
use std::fmt;
use std::io;
use std::io::prelude::*;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{ClassDecl, Expr, ExprId, FunctionDecl, Stmt};
use crate::ctx::Context;
use crate::diag::Position;
use crate::heap::{EnvId, FieldsId, Heap, ListId, Slot};
use crate::interner::Symbol;
use crate::natives;
use crate::resolver::Resolutions;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Literal, Token, TokenKind};
use crate::value::{stringify, Class, Function, InstanceRef, Native, Value};

/// Maximum nesting of function calls before giving up with a stack overflow error.
pub const MAX_CALL_DEPTH: usize = 2048;

/// Maximum length in bytes of a string built by `number * string`.
pub const MAX_STRING_LEN: usize = 1 << 24;

/// How a statement completed.
#[derive(Debug)]
pub enum Flow {
    Normal,
    /// A `break` looking for its enclosing loop.
    Break(Token),
    Return(Value),
}

#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    NumberOperand,
    #[error("Operands must be numbers.")]
    NumberOperands,
    #[error("Operands must be two numbers, two lists, or include a string.")]
    AddOperands,
    #[error("Operands must be numbers, or a number and a string.")]
    MulOperands,
    #[error("Operands must be both numbers or both strings.")]
    ComparisonOperands,
    #[error("Expression multiplying string must evaluate to a non-negative value.")]
    NegativeRepeat,
    #[error("Resulting string is too large.")]
    StringTooLarge,
    #[error("Division by zero.")]
    DivisionByZero,
    #[error("Unexpected operator '{0}'.")]
    UnexpectedOperator(String),
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Variable '{0}' is used before being initialized.")]
    Uninitialized(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Only instances and classes have properties.")]
    NoProperties,
    #[error("Only instances and classes have fields.")]
    NoFields,
    #[error("Cannot assign property with name 'init' (reserved for constructors).")]
    InitAssign,
    #[error("Cannot reassign method '{0}'.")]
    MethodAssign(String),
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Expected {expected} arguments but got {got}.")]
    Arity { expected: usize, got: usize },
    #[error("Superclass must be a class.")]
    SuperclassNotClass,
    #[error("Only lists can be indexed.")]
    NotAList,
    #[error("List indices must be numbers.")]
    IndexNotNumber,
    #[error("Index {0} out of bounds.")]
    IndexOutOfBounds(i64),
    #[error("List index must be a finite number.")]
    IndexNotFinite,
    #[error("Argument must be a list.")]
    ListArgument,
    #[error("Can't pop from an empty list.")]
    EmptyList,
    #[error("'break' outside any enclosing loop.")]
    BreakOutsideLoop,
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Error aborting evaluation, with the token locating it when known.
#[derive(Debug)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub token: Option<Token>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, token: &Token) -> RuntimeError {
        RuntimeError {
            kind,
            token: Some(token.clone()),
        }
    }

    pub fn line(&self) -> Option<Position> {
        self.token.as_ref().map(|t| t.line)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(line) = self.line() {
            write!(f, "\n[line {}]", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> RuntimeError {
        RuntimeError {
            kind: RuntimeErrorKind::Io(e),
            token: None,
        }
    }
}

/// Tree-walking evaluator.
///
/// Keeps the global environment, the heap and the resolutions of every program it ran so that
/// successive programs (REPL lines) see each other's definitions.
#[derive(Debug)]
pub struct Evaluator<'t, W: Write> {
    output: &'t mut W,
    ctx: Rc<Context>,
    heap: Heap,
    resolutions: Resolutions,
    /// Environment of the methods of a class bound to a receiver, keyed by the receiver's
    /// fields and the class's statics.  Class methods use the class's statics as receiver.
    bound_envs: HashMap<(FieldsId, FieldsId), EnvId>,
    call_depth: usize,
}

impl<'t, W: Write> Evaluator<'t, W> {
    pub fn new(output: &'t mut W, ctx: Rc<Context>) -> Evaluator<'t, W> {
        let mut heap = Heap::new();
        let globals = heap.globals();
        for native in Native::ALL.iter() {
            heap.define(globals, ctx.symbol(native.name()), Value::Native(*native));
        }
        Evaluator {
            output,
            ctx,
            heap,
            resolutions: Resolutions::new(),
            bound_envs: HashMap::new(),
            call_depth: 0,
        }
    }

    /// Run `program` in the global environment.
    ///
    /// Statements before a failing one keep their effects.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn interpret(
        &mut self,
        program: &[Stmt],
        resolutions: Resolutions,
    ) -> Result<(), RuntimeError> {
        self.resolutions.extend(resolutions);
        self.call_depth = 0;
        let globals = self.heap.globals();
        for stmt in program {
            match self.exec(stmt, globals)? {
                Flow::Normal => (),
                Flow::Break(token) => {
                    return Err(RuntimeError::new(RuntimeErrorKind::BreakOutsideLoop, &token))
                }
                Flow::Return(_) => {
                    tracing::warn!("'return' reached top level");
                    break;
                }
            }
        }
        tracing::debug!(environments = self.heap.env_count(), "interpreted");
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, env: EnvId) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expr(e) => {
                self.eval(e, env)?;
            }
            Stmt::Var { name, init } => {
                let sym = self.symbol_of(name);
                match init {
                    Some(init) => {
                        let value = self.eval(init, env)?;
                        self.heap.define(env, sym, value);
                    }
                    None => self.heap.declare(env, sym),
                }
            }
            Stmt::Fun(decl) => {
                let sym = self.symbol_of(&decl.name);
                self.heap.capture(env);
                let fun = Function {
                    decl: decl.clone(),
                    closure: env,
                };
                self.heap.define(env, sym, Value::Function(Rc::new(fun)));
            }
            Stmt::Class(decl) => self.class_decl(decl, env)?,
            Stmt::Block(stmts) => {
                let mark = self.heap.mark();
                let block_env = self.heap.new_env(env);
                let flow = self.exec_block(stmts, block_env);
                self.heap.release(mark);
                return flow;
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    return self.exec(then_branch, env);
                } else if let Some(else_branch) = else_branch {
                    return self.exec(else_branch, env);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, env)?.is_truthy() {
                    match self.exec(body, env)? {
                        Flow::Normal => (),
                        Flow::Break(_) => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            Stmt::Break(token) => return Ok(Flow::Break(token.clone())),
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: EnvId) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => (),
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn class_decl(&mut self, decl: &ClassDecl, env: EnvId) -> Result<(), RuntimeError> {
        let superclass = match &decl.superclass {
            Some(var) => match self.look_up(var.id, &var.name, env)? {
                Value::Class(class) => Some(class),
                _ => {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::SuperclassNotClass,
                        &var.name,
                    ))
                }
            },
            None => None,
        };

        let methods = decl
            .methods
            .iter()
            .map(|m| (self.symbol_of(&m.name), m.clone()))
            .collect();
        let class_methods = decl
            .class_methods
            .iter()
            .map(|m| (self.symbol_of(&m.name), m.clone()))
            .collect();
        let name = self.symbol_of(&decl.name);
        self.heap.capture(env);
        let class = Class {
            name: name.clone(),
            superclass,
            methods,
            class_methods,
            closure: env,
            statics: self.heap.new_fields(),
        };
        self.heap.define(env, name, Value::Class(Rc::new(class)));
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, env: EnvId) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.eval_expr(expr, env))
    }

    fn eval_expr(&mut self, expr: &Expr, env: EnvId) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Variable(var) => self.look_up(var.id, &var.name, env),
            Expr::Assign { id, name, value } => {
                let value = self.eval(value, env)?;
                let target = self.target_env(*id, env);
                let sym = self.symbol_of(name);
                if self.heap.assign(target, &sym, value.clone()) {
                    Ok(value)
                } else {
                    Err(RuntimeError::new(
                        RuntimeErrorKind::UndefinedVariable(name.lexeme.to_string()),
                        name,
                    ))
                }
            }
            Expr::FieldAssign {
                object,
                field,
                value,
            } => {
                let object = self.eval(object, env)?;
                if !matches!(object, Value::Instance(_) | Value::Class(_)) {
                    return Err(RuntimeError::new(RuntimeErrorKind::NoFields, field));
                }
                let value = self.eval(value, env)?;
                self.set_property(object, field, value)
            }
            Expr::ListAssign {
                list,
                bracket,
                index,
                value,
            } => {
                let list = self.eval(list, env)?;
                let id = list_id(&list, bracket)?;
                let index = self.eval(index, env)?;
                let value = self.eval(value, env)?;
                let i = list_index(&index, self.heap.list(id).len(), bracket)?;
                self.heap.list_mut(id)[i] = value.clone();
                Ok(value)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match op.kind {
                    TokenKind::Minus => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(RuntimeError::new(RuntimeErrorKind::NumberOperand, op)),
                    },
                    TokenKind::Bang => Ok(Value::Bool(!value.is_truthy())),
                    _ => Err(RuntimeError::new(
                        RuntimeErrorKind::UnexpectedOperator(op.lexeme.to_string()),
                        op,
                    )),
                }
            }
            Expr::Binary { left, op, right } => {
                let left = self.eval(left, env)?;
                match op.kind {
                    TokenKind::And => {
                        if !left.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                        Ok(Value::Bool(self.eval(right, env)?.is_truthy()))
                    }
                    TokenKind::Or => {
                        if left.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                        Ok(Value::Bool(self.eval(right, env)?.is_truthy()))
                    }
                    _ => {
                        let right = self.eval(right, env)?;
                        self.binary_op(op, left, right)
                    }
                }
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then_expr, env)
                } else {
                    self.eval(else_expr, env)
                }
            }
            Expr::Grouping(e) => self.eval(e, env),
            Expr::List(elements) => {
                let elements = elements
                    .iter()
                    .map(|e| self.eval(e, env))
                    .collect::<Result<Vec<Value>, RuntimeError>>()?;
                Ok(Value::List(self.heap.new_list(elements)))
            }
            Expr::ListAccess {
                list,
                bracket,
                index,
            } => {
                let list = self.eval(list, env)?;
                let id = list_id(&list, bracket)?;
                let index = self.eval(index, env)?;
                let elements = self.heap.list(id);
                let i = list_index(&index, elements.len(), bracket)?;
                Ok(elements[i].clone())
            }
            Expr::Call {
                callee,
                paren,
                args,
            } => {
                let callee = self.eval(callee, env)?;
                let arity = self
                    .arity_of(&callee)
                    .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NotCallable, paren))?;
                if args.len() != arity {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::Arity {
                            expected: arity,
                            got: args.len(),
                        },
                        paren,
                    ));
                }
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<Result<Vec<Value>, RuntimeError>>()?;
                self.call(callee, args, paren)
            }
            Expr::Lambda(decl) => {
                self.heap.capture(env);
                Ok(Value::Function(Rc::new(Function {
                    decl: decl.clone(),
                    closure: env,
                })))
            }
            Expr::Get { object, name } => {
                let object = self.eval(object, env)?;
                self.get_property(object, name)
            }
            Expr::This { id, keyword } => self.look_up(*id, keyword, env),
            Expr::Super {
                id,
                keyword,
                method,
            } => {
                let view = self.look_up(*id, keyword, env)?;
                self.get_property(view, method)
            }
        }
    }

    fn binary_op(&mut self, op: &Token, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let error = |kind| Err(RuntimeError::new(kind, op));
        match op.kind {
            TokenKind::Comma => Ok(right),
            TokenKind::Plus => match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let mut s = stringify(&left, &self.heap);
                    s.push_str(&stringify(&right, &self.heap));
                    Ok(Value::Str(Rc::from(s)))
                }
                (Value::List(l), Value::List(r)) => {
                    let mut elements = self.heap.list(*l).to_vec();
                    elements.extend_from_slice(self.heap.list(*r));
                    Ok(Value::List(self.heap.new_list(elements)))
                }
                _ => error(RuntimeErrorKind::AddOperands),
            },
            // Desugared `x++` and `x--`.
            TokenKind::PlusPlus | TokenKind::MinusMinus => match (left, right) {
                (Value::Number(l), Value::Number(r)) if op.kind == TokenKind::PlusPlus => {
                    Ok(Value::Number(l + r))
                }
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l - r)),
                _ => error(RuntimeErrorKind::NumberOperand),
            },
            TokenKind::Minus => match (left, right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l - r)),
                _ => error(RuntimeErrorKind::NumberOperands),
            },
            TokenKind::Slash => match (left, right) {
                (Value::Number(_), Value::Number(r)) if r == 0.0 => {
                    error(RuntimeErrorKind::DivisionByZero)
                }
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l / r)),
                _ => error(RuntimeErrorKind::NumberOperands),
            },
            TokenKind::Star => match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l * r)),
                (Value::Number(n), Value::Str(s)) | (Value::Str(s), Value::Number(n)) => {
                    match repeat(s, *n) {
                        Ok(s) => Ok(Value::Str(s)),
                        Err(kind) => error(kind),
                    }
                }
                _ => error(RuntimeErrorKind::MulOperands),
            },
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Bool(compare(&op.kind, l, r))),
                (Value::Str(l), Value::Str(r)) => Ok(Value::Bool(compare(&op.kind, l, r))),
                _ => error(RuntimeErrorKind::ComparisonOperands),
            },
            TokenKind::EqualEqual => Ok(Value::Bool(left == right)),
            TokenKind::BangEqual => Ok(Value::Bool(left != right)),
            _ => error(RuntimeErrorKind::UnexpectedOperator(op.lexeme.to_string())),
        }
    }

    fn arity_of(&self, callee: &Value) -> Option<usize> {
        match callee {
            Value::Function(f) => Some(f.arity()),
            Value::Native(n) => Some(n.arity()),
            Value::Class(c) => Some(self.class_arity(c)),
            _ => None,
        }
    }

    /// Arity of the nearest `init`, inherited ones included.
    fn class_arity(&self, class: &Rc<Class>) -> usize {
        class
            .find_method(&self.ctx.init_sym)
            .map_or(0, |(_, init)| init.params.len())
    }

    /// Call `callee` with arguments whose count matches its arity.
    fn call(&mut self, callee: Value, args: Vec<Value>, paren: &Token) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(f) => self.call_function(&f, args, paren),
            Value::Native(n) => natives::call(n, &args, &mut self.heap, &mut *self.output)
                .map_err(|kind| RuntimeError::new(kind, paren)),
            Value::Class(c) => self.construct(&c, args, paren),
            _ => Err(RuntimeError::new(RuntimeErrorKind::NotCallable, paren)),
        }
    }

    fn call_function(
        &mut self,
        f: &Function,
        args: Vec<Value>,
        paren: &Token,
    ) -> Result<Value, RuntimeError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow, paren));
        }
        let mark = self.heap.mark();
        let env = self.heap.new_env(f.closure);
        for (param, arg) in f.decl.params.iter().zip(args) {
            let sym = self.symbol_of(param);
            self.heap.define(env, sym, arg);
        }

        tracing::trace!(function = %f.decl.name, depth = self.call_depth, "call");
        self.call_depth += 1;
        let flow = ensure_sufficient_stack(|| self.exec_block(&f.decl.body, env));
        self.call_depth -= 1;
        self.heap.release(mark);

        match flow? {
            Flow::Normal => Ok(Value::Nil),
            Flow::Return(value) => Ok(value),
            Flow::Break(token) => Err(RuntimeError::new(
                RuntimeErrorKind::BreakOutsideLoop,
                &token,
            )),
        }
    }

    fn construct(
        &mut self,
        class: &Rc<Class>,
        args: Vec<Value>,
        paren: &Token,
    ) -> Result<Value, RuntimeError> {
        let instance = InstanceRef::new(self.heap.new_fields(), class.clone());
        self.initialize(class, &instance, &args, paren)?;
        Ok(Value::Instance(instance))
    }

    /// Run the initializers of `class` and its superclasses, outermost first.
    ///
    /// Superclasses without any `init` up their chain are skipped, whatever the argument count.
    fn initialize(
        &mut self,
        class: &Rc<Class>,
        instance: &InstanceRef,
        args: &[Value],
        paren: &Token,
    ) -> Result<(), RuntimeError> {
        let superclass = class
            .superclass
            .as_ref()
            .filter(|s| s.find_method(&self.ctx.init_sym).is_some());
        if let Some(superclass) = superclass {
            let expected = self.class_arity(superclass);
            if expected != args.len() {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::Arity {
                        expected,
                        got: args.len(),
                    },
                    paren,
                ));
            }
            self.initialize(superclass, instance, args, paren)?;
        }
        if let Some(init) = class.methods.get(&self.ctx.init_sym) {
            let init = self.bind_method(class, init, instance);
            self.call_function(&init, args.to_vec(), paren)?;
        }
        Ok(())
    }

    /// Bind a method of `owner` to `receiver`.
    ///
    /// The environment of the bound method holds `this`, `super` when `owner` has a superclass,
    /// and all methods of `owner` bound the same way.  It is built once per receiver and owner.
    fn bind_method(
        &mut self,
        owner: &Rc<Class>,
        decl: &Rc<FunctionDecl>,
        receiver: &InstanceRef,
    ) -> Function {
        let key = (receiver.fields, owner.statics);
        if let Some(env) = self.bound_envs.get(&key) {
            return Function {
                decl: decl.clone(),
                closure: *env,
            };
        }

        let env = self.heap.new_env(owner.closure);
        self.heap.capture(env);
        self.bound_envs.insert(key, env);
        self.heap.define(
            env,
            self.ctx.this_sym.clone(),
            Value::Instance(receiver.receiver()),
        );
        if let Some(superclass) = &owner.superclass {
            self.heap.define(
                env,
                self.ctx.super_sym.clone(),
                Value::Instance(receiver.viewed_as(superclass.clone())),
            );
        }
        self.define_methods(env, &owner.methods);
        Function {
            decl: decl.clone(),
            closure: env,
        }
    }

    /// Bind a class method of `class`, with `this` being the class itself.
    fn bind_class_method(&mut self, class: &Rc<Class>, decl: &Rc<FunctionDecl>) -> Function {
        let key = (class.statics, class.statics);
        if let Some(env) = self.bound_envs.get(&key) {
            return Function {
                decl: decl.clone(),
                closure: *env,
            };
        }

        let env = self.heap.new_env(class.closure);
        self.heap.capture(env);
        self.bound_envs.insert(key, env);
        self.heap
            .define(env, self.ctx.this_sym.clone(), Value::Class(class.clone()));
        self.define_methods(env, &class.class_methods);
        Function {
            decl: decl.clone(),
            closure: env,
        }
    }

    fn define_methods(
        &mut self,
        env: EnvId,
        methods: &HashMap<Symbol, Rc<FunctionDecl>>,
    ) {
        for (name, decl) in methods.iter() {
            let method = Function {
                decl: decl.clone(),
                closure: env,
            };
            self.heap
                .define(env, name.clone(), Value::Function(Rc::new(method)));
        }
    }

    fn get_property(&mut self, object: Value, name: &Token) -> Result<Value, RuntimeError> {
        let sym = self.symbol_of(name);
        let undefined = || {
            Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedProperty(name.lexeme.to_string()),
                name,
            ))
        };
        let method = match object {
            Value::Instance(_) | Value::Class(_) if sym == self.ctx.init_sym => return undefined(),
            Value::Instance(instance) => {
                if let Some(value) = self.heap.field(instance.fields, &sym) {
                    return Ok(value);
                }
                match instance.lookup.find_method(&sym) {
                    Some((owner, decl)) => self.bind_method(&owner, &decl, &instance),
                    None => return undefined(),
                }
            }
            Value::Class(class) => {
                if let Some(value) = self.heap.field(class.statics, &sym) {
                    return Ok(value);
                }
                match class.find_class_method(&sym) {
                    Some(decl) => self.bind_class_method(&class, &decl),
                    None => return undefined(),
                }
            }
            _ => return Err(RuntimeError::new(RuntimeErrorKind::NoProperties, name)),
        };

        if method.is_getter() {
            self.call_function(&method, vec![], name)
        } else {
            Ok(Value::Function(Rc::new(method)))
        }
    }

    fn set_property(
        &mut self,
        object: Value,
        name: &Token,
        value: Value,
    ) -> Result<Value, RuntimeError> {
        let sym = self.symbol_of(name);
        let (fields, is_method) = match &object {
            Value::Instance(_) | Value::Class(_) if sym == self.ctx.init_sym => {
                return Err(RuntimeError::new(RuntimeErrorKind::InitAssign, name));
            }
            Value::Instance(instance) => {
                (instance.fields, instance.class.find_method(&sym).is_some())
            }
            Value::Class(class) => (class.statics, class.find_class_method(&sym).is_some()),
            _ => return Err(RuntimeError::new(RuntimeErrorKind::NoFields, name)),
        };
        if is_method {
            return Err(RuntimeError::new(
                RuntimeErrorKind::MethodAssign(name.lexeme.to_string()),
                name,
            ));
        }
        self.heap.set_field(fields, sym, value.clone());
        Ok(value)
    }

    fn look_up(&self, id: ExprId, name: &Token, env: EnvId) -> Result<Value, RuntimeError> {
        let sym = self.symbol_of(name);
        let target = self.target_env(id, env);
        match self.heap.get(target, &sym) {
            Some(Slot::Bound(value)) => Ok(value.clone()),
            Some(Slot::Uninit) => Err(RuntimeError::new(
                RuntimeErrorKind::Uninitialized(name.lexeme.to_string()),
                name,
            )),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedVariable(name.lexeme.to_string()),
                name,
            )),
        }
    }

    /// Environment holding the variable referenced by node `id`: found by depth for locals,
    /// the global environment otherwise.
    fn target_env(&self, id: ExprId, env: EnvId) -> EnvId {
        match self.resolutions.depth(id) {
            Some(depth) => self.heap.ancestor(env, depth),
            None => self.heap.globals(),
        }
    }

    /// Name of an identifier, `this` or `super` token.
    fn symbol_of(&self, token: &Token) -> Symbol {
        match token.symbol() {
            Some(sym) => sym.clone(),
            None => self.ctx.symbol(&token.lexeme),
        }
    }
}

fn list_id(value: &Value, bracket: &Token) -> Result<ListId, RuntimeError> {
    match value {
        Value::List(id) => Ok(*id),
        _ => Err(RuntimeError::new(RuntimeErrorKind::NotAList, bracket)),
    }
}

/// Truncate `index` toward zero and check it is within `0..len`.
fn list_index(index: &Value, len: usize, bracket: &Token) -> Result<usize, RuntimeError> {
    match index {
        Value::Number(n) if !n.is_finite() => {
            Err(RuntimeError::new(RuntimeErrorKind::IndexNotFinite, bracket))
        }
        Value::Number(n) => {
            let i = n.trunc();
            if i >= 0.0 && i < len as f64 {
                Ok(i as usize)
            } else {
                Err(RuntimeError::new(
                    RuntimeErrorKind::IndexOutOfBounds(i as i64),
                    bracket,
                ))
            }
        }
        _ => Err(RuntimeError::new(RuntimeErrorKind::IndexNotNumber, bracket)),
    }
}

fn compare<T: PartialOrd + ?Sized>(kind: &TokenKind, l: &T, r: &T) -> bool {
    match kind {
        TokenKind::Greater => l > r,
        TokenKind::GreaterEqual => l >= r,
        TokenKind::Less => l < r,
        _ => l <= r,
    }
}

/// `s` repeated `floor(n)` times.
fn repeat(s: &str, n: f64) -> Result<Rc<str>, RuntimeErrorKind> {
    if n.is_nan() || n < 0.0 {
        return Err(RuntimeErrorKind::NegativeRepeat);
    }
    if n.is_infinite() {
        return Err(RuntimeErrorKind::StringTooLarge);
    }
    let count = n.floor() as usize;
    match s.len().checked_mul(count) {
        Some(len) if len <= MAX_STRING_LEN => Ok(Rc::from(s.repeat(count))),
        _ => Err(RuntimeErrorKind::StringTooLarge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::parser::parse;
    use crate::resolver::resolve;
    use crate::scanner::scan;
    use pretty_assertions::assert_eq;

    fn run_with_ctx(ctx: Rc<Context>, src: &str) -> Result<String, RuntimeError> {
        let mut diags = Diagnostics::new();
        let tokens = scan(src, &ctx, &mut diags);
        let prg = parse(&tokens, &ctx, &mut diags).unwrap_or_default();
        let resolutions = resolve(&prg, &ctx, &mut diags);
        assert!(diags.is_empty(), "static errors: {}", diags);

        let mut out: Vec<u8> = Vec::new();
        let mut e = Evaluator::new(&mut out, ctx);
        e.interpret(&prg, resolutions)?;
        Ok(String::from_utf8(out).expect("error while converting output"))
    }

    fn run(src: &str) -> Result<String, RuntimeError> {
        run_with_ctx(Context::new(), src)
    }

    /// Number of environments still allocated once `src` has run.
    fn envs_after(src: &str) -> Result<usize, RuntimeError> {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let tokens = scan(src, &ctx, &mut diags);
        let prg = parse(&tokens, &ctx, &mut diags).unwrap_or_default();
        let resolutions = resolve(&prg, &ctx, &mut diags);
        assert!(diags.is_empty(), "static errors: {}", diags);

        let mut out: Vec<u8> = Vec::new();
        let mut e = Evaluator::new(&mut out, ctx);
        e.interpret(&prg, resolutions)?;
        Ok(e.heap.env_count())
    }

    fn eval_expr(src: &str) -> Result<String, RuntimeError> {
        run(&format!("print({});", src))
    }

    #[test]
    fn arithmetic() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("1 + 2 * 3")?, "7\n");
        assert_eq!(eval_expr("1 - 3")?, "-2\n");
        assert_eq!(eval_expr("6 / 4")?, "1.5\n");
        assert_eq!(eval_expr("-(1 + 1)")?, "-2\n");
        Ok(())
    }

    #[test]
    fn division_by_zero() {
        match eval_expr("6 / 0") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::DivisionByZero,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn unary_minus_on_bool() {
        match eval_expr("-true") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NumberOperand,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn string_concatenation_stringifies() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("1 + \"a\"")?, "1a\n");
        assert_eq!(eval_expr("\"a\" + nil")?, "anil\n");
        assert_eq!(eval_expr("\"l\" + [1, true]")?, "l[1, true]\n");
        Ok(())
    }

    #[test]
    fn string_repeat() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("\"ab\" * 3")?, "ababab\n");
        assert_eq!(eval_expr("3 * \"ab\"")?, "ababab\n");
        assert_eq!(eval_expr("2.7 * \"ab\"")?, "abab\n");
        assert_eq!(eval_expr("0 * \"ab\"")?, "\n");
        Ok(())
    }

    #[test]
    fn negative_string_repeat() {
        match eval_expr("-1 * \"ab\"") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NegativeRepeat,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn huge_string_repeat() {
        match eval_expr("1000000000000 * \"ab\"") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::StringTooLarge,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn non_finite_string_repeat() {
        let inf = "var inf = 1; while (inf < inf * 2) inf = inf * 2;";
        match run(&format!("{} print(inf * \"ab\");", inf)) {
            Err(RuntimeError {
                kind: RuntimeErrorKind::StringTooLarge,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run(&format!("{} print((inf - inf) * \"ab\");", inf)) {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NegativeRepeat,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn comparisons() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("1 < 2")?, "true\n");
        assert_eq!(eval_expr("2 <= 2")?, "true\n");
        assert_eq!(eval_expr("\"abc\" < \"abd\"")?, "true\n");
        assert_eq!(eval_expr("\"b\" >= \"a\"")?, "true\n");
        match eval_expr("1 < \"a\"") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::ComparisonOperands,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        Ok(())
    }

    #[test]
    fn equality_never_fails() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("1 == true")?, "false\n");
        assert_eq!(eval_expr("nil == nil")?, "true\n");
        assert_eq!(eval_expr("\"a\" != \"a\"")?, "false\n");
        assert_eq!(eval_expr("[1] == [1]")?, "false\n");
        assert_eq!(run("var l = [1]; print(l == l);")?, "true\n");
        Ok(())
    }

    #[test]
    fn logic_returns_booleans() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("1 and 2")?, "true\n");
        assert_eq!(eval_expr("nil or \"x\"")?, "true\n");
        assert_eq!(eval_expr("nil and undefined()")?, "false\n");
        assert_eq!(eval_expr("1 or undefined()")?, "true\n");
        Ok(())
    }

    #[test]
    fn comma_and_ternary() -> Result<(), RuntimeError> {
        assert_eq!(eval_expr("(1, 2)")?, "2\n");
        assert_eq!(eval_expr("0 ? \"t\" : \"f\"")?, "t\n");
        assert_eq!(eval_expr("nil ? undefined() : false ? 1 : 2")?, "2\n");
        Ok(())
    }

    #[test]
    fn variables() -> Result<(), RuntimeError> {
        assert_eq!(run("var a = 1; a = a + 1; print(a);")?, "2\n");
        assert_eq!(run("var a = 1; { var a = 2; print(a); } print(a);")?, "2\n1\n");
        assert_eq!(run("var a = 1; var a = 3; print(a);")?, "3\n");
        Ok(())
    }

    #[test]
    fn uninitialized_variable() -> Result<(), RuntimeError> {
        match run("var x; print(x);") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::Uninitialized(name),
                ..
            }) if name == "x" => (),
            out => panic!("unexpected output: {:?}", out),
        }
        assert_eq!(run("var x; x = 4; print(x);")?, "4\n");
        Ok(())
    }

    #[test]
    fn undefined_variable() {
        match run("y = 1;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::UndefinedVariable(name),
                token: Some(token),
            }) if name == "y" && token.line == 1 => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn increments() -> Result<(), RuntimeError> {
        assert_eq!(run("var i = 1; i++; i++; i--; print(i);")?, "2\n");
        assert_eq!(run("var l = [5]; l[0]++; print(l);")?, "[6]\n");
        Ok(())
    }

    #[test]
    fn while_and_break() -> Result<(), RuntimeError> {
        assert_eq!(
            run("var i = 0; while (true) { if (i == 3) break; print(i); i = i + 1; }")?,
            "0\n1\n2\n"
        );
        assert_eq!(
            run("for (var i = 0; i < 3; i = i + 1) print(i);")?,
            "0\n1\n2\n"
        );
        Ok(())
    }

    #[test]
    fn break_outside_loop() {
        match run("print(1); break; print(2);") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::BreakOutsideLoop,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("fun f() { break; } while (true) f();") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::BreakOutsideLoop,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn closures_share_environment() -> Result<(), RuntimeError> {
        let src = "fun counter() { var i = 0; fun inc() { i = i + 1; return i; } return inc; }
                   var c = counter(); print(c()); print(c());";
        assert_eq!(run(src)?, "1\n2\n");
        Ok(())
    }

    #[test]
    fn closure_binding_is_lexical() -> Result<(), RuntimeError> {
        let src = "var a = \"global\";
                   { fun show() { print(a); } show(); var a = \"block\"; show(); print(a); }";
        assert_eq!(run(src)?, "global\nglobal\nblock\n");
        Ok(())
    }

    #[test]
    fn lambdas() -> Result<(), RuntimeError> {
        assert_eq!(
            run("var add = fun (a, b) { return a + b; }; print(add(1, 2)); print(add);")?,
            "3\n<fn lambda>\n"
        );
        Ok(())
    }

    #[test]
    fn bad_arity() {
        match run("fun f(a) {} f();") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::Arity {
                    expected: 1,
                    got: 0,
                },
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn not_callable() {
        match run("\"f\"();") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NotCallable,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn unbounded_recursion() {
        match run("fun f() { f(); } f();") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::StackOverflow,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn lists() -> Result<(), RuntimeError> {
        assert_eq!(
            run("var l = [1, 2, 3]; l[1] = \"b\"; print(l[1]); print(l[2.9]); print(l);")?,
            "b\n3\n[1, b, 3]\n"
        );
        assert_eq!(eval_expr("[1] + [2, 3]")?, "[1, 2, 3]\n");
        Ok(())
    }

    #[test]
    fn list_index_out_of_bounds() {
        match run("var l = [1, 2, 3]; l[5];") {
            Err(e) => {
                assert_eq!(e.to_string(), "Index 5 out of bounds.\n[line 1]");
            }
            out => panic!("unexpected output: {:?}", out),
        }
        match run("var l = [1]; l[-1] = 0;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::IndexOutOfBounds(-1),
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn loops_do_not_accumulate_environments() -> Result<(), RuntimeError> {
        assert_eq!(
            envs_after("var i = 0; while (i < 10000) { i = i + 1; }")?,
            1
        );
        let calls = r#"
            fun f(x) { var y = x; { var z = y; return z; } }
            for (var i = 0; i < 10000; i++) { f(i); }
        "#;
        assert_eq!(envs_after(calls)?, 1);
        let methods = r#"
            class C {
                m() { return this.n; }
                n { return 1; }
                class k() { return 2; }
            }
            var c = C();
            for (var i = 0; i < 10000; i++) { c.m(); C.k(); }
        "#;
        assert!(envs_after(methods)? < 10);
        Ok(())
    }

    #[test]
    fn captured_environments_outlive_their_block() -> Result<(), RuntimeError> {
        let prg = r#"
            var fs = [];
            var i = 0;
            while (i < 3) {
                var j = i;
                append(fs, fun () { return j; });
                i = i + 1;
            }
            { var k = 99; print(k); }
            fun id(x) { return x; }
            id(1);
            print(fs[0]());
            print(fs[2]());
        "#;
        assert_eq!(run(prg)?, "99\n0\n2\n");
        Ok(())
    }

    #[test]
    fn non_finite_list_index() {
        let prg = "var inf = 1; while (inf < inf * 2) inf = inf * 2; var l = [1]; print(l[inf - inf]);";
        match run(prg) {
            Err(e) => assert_eq!(
                e.to_string(),
                "List index must be a finite number.\n[line 1]"
            ),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("var inf = 1; while (inf < inf * 2) inf = inf * 2; var l = [1]; l[inf] = 2;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::IndexNotFinite,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn classes_and_fields() -> Result<(), RuntimeError> {
        let src = "class Point {
                     init(x, y) { this.x = x; this.y = y; }
                     sum() { return this.x + this.y; }
                     norm1 { return this.sum(); }
                   }
                   var p = Point(1, 2);
                   print(p.sum()); print(p.norm1); p.x = 10; print(p.norm1);
                   print(Point); print(p);";
        assert_eq!(run(src)?, "3\n3\n12\n<class Point>\n<instance Point>\n");
        Ok(())
    }

    #[test]
    fn init_is_not_a_property() {
        match run("class A { init() {} } A().init();") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::UndefinedProperty(name),
                ..
            }) if name == "init" => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("class A {} A().init = 1;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::InitAssign,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("class A {} A.init = 5;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::InitAssign,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("class A { init() {} } print(A.init);") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::UndefinedProperty(name),
                ..
            }) if name == "init" => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn methods_cannot_be_reassigned() {
        match run("class A { m() {} } var a = A(); a.m = 1;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::MethodAssign(name),
                ..
            }) if name == "m" => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn properties_need_an_object() {
        match run("var x = 1; x.y;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NoProperties,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        match run("var x = 1; x.y = 2;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::NoFields,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn inheritance_and_super() -> Result<(), RuntimeError> {
        let src = "class A {
                     init(n) { print(\"A.init\"); this.n = n; }
                     hello() { return \"A says \" + this.name(); }
                     name() { return \"a\"; }
                   }
                   class B < A {
                     init(n) { print(\"B.init\"); }
                     hello() { return super.hello() + \"!\"; }
                     name() { return \"b\"; }
                   }
                   var b = B(7);
                   print(b.n); print(b.hello()); print(b);";
        assert_eq!(
            run(src)?,
            "A.init\nB.init\n7\nA says b!\n<instance B>\n"
        );
        Ok(())
    }

    #[test]
    fn inherited_init_sets_arity() -> Result<(), RuntimeError> {
        assert_eq!(
            run("class A { init(x) { this.x = x; } } class B < A {} print(B(3).x);")?,
            "3\n"
        );
        Ok(())
    }

    #[test]
    fn superclass_must_be_a_class() {
        match run("var A = 1; class B < A {}") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::SuperclassNotClass,
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn class_methods_and_fields() -> Result<(), RuntimeError> {
        let src = "class Math {
                     class square(n) { return n * n; }
                     class answer { return this.base + 2; }
                   }
                   Math.base = 40;
                   print(Math.square(3)); print(Math.answer);";
        assert_eq!(run(src)?, "9\n42\n");
        match run("class A { class m() {} } A.m = 1;") {
            Err(RuntimeError {
                kind: RuntimeErrorKind::MethodAssign(_),
                ..
            }) => (),
            out => panic!("unexpected output: {:?}", out),
        }
        Ok(())
    }

    #[test]
    fn sibling_methods_are_in_scope() -> Result<(), RuntimeError> {
        let src = "class A { m() { return helper(); } helper() { return this.v; } }
                   var a = A(); a.v = 5; print(a.m());";
        assert_eq!(run(src)?, "5\n");
        Ok(())
    }

    #[test]
    fn definitions_persist_across_runs() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let mut out: Vec<u8> = Vec::new();
        let mut e = Evaluator::new(&mut out, ctx.clone());
        for src in ["fun f(x) { return x * 2; }", "{ var y = f(2); print(y); }"].iter() {
            let mut diags = Diagnostics::new();
            let tokens = scan(src, &ctx, &mut diags);
            let prg = parse(&tokens, &ctx, &mut diags).unwrap_or_default();
            let resolutions = resolve(&prg, &ctx, &mut diags);
            assert!(diags.is_empty(), "{}", diags);
            e.interpret(&prg, resolutions)?;
        }
        assert_eq!(out, b"4\n");
        Ok(())
    }

    #[test]
    fn error_display() {
        let err = RuntimeError::new(
            RuntimeErrorKind::DivisionByZero,
            &Token::new(TokenKind::Slash, "/", 3),
        );
        assert_eq!(err.to_string(), "Division by zero.\n[line 3]");
    }
}
