use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::ExprId;
use crate::interner::{Interner, Symbol};
use crate::token::TokenKind;

/// Global mostly read-only state context that persists across the runs of one interpreter
/// session.
///
/// It anchors the string interner, maps keywords to their token kinds, keeps the symbols the
/// runtime looks up by name (`this`, `super`, `init`) and hands out node ids.  Node ids must be
/// unique for the whole session because resolutions computed for one REPL line are kept by the
/// evaluator alongside those of previous lines.
#[derive(Debug)]
pub struct Context {
    interner: RefCell<Interner>,
    keywords: HashMap<Symbol, TokenKind>,
    next_expr_id: Cell<u32>,
    pub this_sym: Symbol,
    pub super_sym: Symbol,
    pub init_sym: Symbol,
}

impl Context {
    /// Creates a new context.
    ///
    /// Returns a Rc because the context is shared between the scanner, parser, resolver and
    /// evaluator.
    pub fn new() -> Rc<Self> {
        let mut interner = Interner::new();

        let mut keywords = HashMap::new();
        for (name, kind) in KEYWORDS.iter().cloned() {
            keywords.insert(interner.symbol(name), kind);
        }

        let this_sym = interner.symbol("this");
        let super_sym = interner.symbol("super");
        let init_sym = interner.symbol("init");

        Rc::new(Context {
            interner: RefCell::new(interner),
            keywords,
            next_expr_id: Cell::new(0),
            this_sym,
            super_sym,
            init_sym,
        })
    }

    /// Intern the given string if needed and return its associated symbol.
    pub fn symbol(&self, name: &str) -> Symbol {
        self.interner.borrow_mut().symbol(name)
    }

    /// Return the token kind associated with the given symbol if it is a keyword.
    pub fn keyword(&self, id: &Symbol) -> Option<TokenKind> {
        self.keywords.get(id).cloned()
    }

    /// Allocate a fresh id for an expression node that the resolver annotates.
    pub fn next_expr_id(&self) -> ExprId {
        let id = self.next_expr_id.get();
        self.next_expr_id.set(id + 1);
        ExprId(id)
    }
}

const KEYWORDS: [(&str, TokenKind); 16] = [
    ("and", TokenKind::And),
    ("break", TokenKind::Break),
    ("class", TokenKind::Class),
    ("else", TokenKind::Else),
    ("false", TokenKind::False),
    ("for", TokenKind::For),
    ("fun", TokenKind::Fun),
    ("if", TokenKind::If),
    ("nil", TokenKind::Nil),
    ("or", TokenKind::Or),
    ("return", TokenKind::Return),
    ("super", TokenKind::Super),
    ("this", TokenKind::This),
    ("true", TokenKind::True),
    ("var", TokenKind::Var),
    ("while", TokenKind::While),
];
