use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::ast::{FunctionDecl, FunctionKind};
use crate::heap::{EnvId, FieldsId, Heap, ListId};
use crate::interner::Symbol;

/// Runtime value.
///
/// Numbers, booleans, nil and strings compare by value.  Everything else compares by identity.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(ListId),
    Function(Rc<Function>),
    Native(Native),
    Class(Rc<Class>),
    Instance(InstanceRef),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Number(l), Value::Number(r)) => l == r,
            (Value::Str(l), Value::Str(r)) => l == r,
            (Value::List(l), Value::List(r)) => l == r,
            (Value::Function(l), Value::Function(r)) => Rc::ptr_eq(l, r),
            (Value::Native(l), Value::Native(r)) => l == r,
            (Value::Class(l), Value::Class(r)) => Rc::ptr_eq(l, r),
            (Value::Instance(l), Value::Instance(r)) => l.fields == r.fields,
            _ => false,
        }
    }
}

/// User-defined function, lambda or bound method.
pub struct Function {
    pub decl: Rc<FunctionDecl>,
    pub closure: EnvId,
}

impl Function {
    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub fn is_getter(&self) -> bool {
        self.decl.kind == FunctionKind::Getter
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.decl.name.lexeme)
            .field("arity", &self.arity())
            .finish()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decl.kind {
            FunctionKind::Lambda => write!(f, "<fn lambda>"),
            _ => write!(f, "<fn {}>", self.decl.name.lexeme),
        }
    }
}

/// Built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    Clock,
    Print,
    Len,
    Append,
    Pop,
}

impl Native {
    pub const ALL: [Native; 5] = [
        Native::Clock,
        Native::Print,
        Native::Len,
        Native::Append,
        Native::Pop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Native::Clock => "clock",
            Native::Print => "print",
            Native::Len => "len",
            Native::Append => "append",
            Native::Pop => "pop",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Native::Clock => 0,
            Native::Print | Native::Len | Native::Pop => 1,
            Native::Append => 2,
        }
    }
}

pub struct Class {
    pub name: Symbol,
    pub superclass: Option<Rc<Class>>,
    pub methods: HashMap<Symbol, Rc<FunctionDecl>>,
    /// Methods called on the class itself, not inherited by subclasses.
    pub class_methods: HashMap<Symbol, Rc<FunctionDecl>>,
    pub closure: EnvId,
    /// Class-level fields.
    pub statics: FieldsId,
}

impl Class {
    /// Find an instance method starting from this class and walking up the superclass chain.
    /// Returns the class that defines it along with its declaration.
    pub fn find_method(self: &Rc<Self>, name: &Symbol) -> Option<(Rc<Class>, Rc<FunctionDecl>)> {
        let mut class = self.clone();
        loop {
            if let Some(decl) = class.methods.get(name) {
                return Some((class.clone(), decl.clone()));
            }
            class = class.superclass.clone()?;
        }
    }

    pub fn find_class_method(&self, name: &Symbol) -> Option<Rc<FunctionDecl>> {
        self.class_methods.get(name).cloned()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|s| s.name.clone()),
            )
            .finish()
    }
}

/// Reference to an instance.
///
/// `class` is the class the instance was created from.  `lookup` is where method lookup starts:
/// the same class for ordinary references, the superclass of the method's owner for the
/// `super` view of an instance.
#[derive(Clone)]
pub struct InstanceRef {
    pub fields: FieldsId,
    pub class: Rc<Class>,
    pub lookup: Rc<Class>,
}

impl InstanceRef {
    pub fn new(fields: FieldsId, class: Rc<Class>) -> InstanceRef {
        InstanceRef {
            fields,
            lookup: class.clone(),
            class,
        }
    }

    /// View of the same instance resolving methods from `class`.
    pub fn viewed_as(&self, class: Rc<Class>) -> InstanceRef {
        InstanceRef {
            fields: self.fields,
            class: self.class.clone(),
            lookup: class,
        }
    }

    /// The instance as seen by its own class.
    pub fn receiver(&self) -> InstanceRef {
        InstanceRef::new(self.fields, self.class.clone())
    }
}

impl fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRef")
            .field("fields", &self.fields)
            .field("class", &self.class.name)
            .finish()
    }
}

/// Text `print` writes for `value`.
pub fn stringify(value: &Value, heap: &Heap) -> String {
    let mut out = String::new();
    let mut visiting = HashSet::new();
    write_value(&mut out, value, heap, &mut visiting);
    out
}

fn write_value(out: &mut String, value: &Value, heap: &Heap, visiting: &mut HashSet<ListId>) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Str(s) => out.push_str(s),
        Value::List(id) => {
            if !visiting.insert(*id) {
                out.push_str("[...]");
                return;
            }
            out.push('[');
            for (i, element) in heap.list(*id).iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, element, heap, visiting);
            }
            out.push(']');
            visiting.remove(id);
        }
        Value::Function(fun) => out.push_str(&fun.to_string()),
        Value::Native(_) => out.push_str("<native fn>"),
        Value::Class(class) => out.push_str(&format!("<class {}>", class.name)),
        Value::Instance(inst) => out.push_str(&format!("<instance {}>", inst.class.name)),
    }
}

/// Integral values print without a fractional part.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
