//! Arena storage for the mutable runtime objects.
//!
//! Environments, instance field tables and list contents can reference each other in cycles
//! (a closure stored in a field of an instance its environment holds, a list containing
//! itself...).  They live in flat vectors addressed by copyable ids and are reclaimed all at
//! once when the heap is dropped.
//!
//! Environments are also reclaimed earlier, in stack order: a block or call releases the
//! environments it created unless a closure or class captured one of them.  Any value holding
//! an `EnvId` must [`Heap::capture`] it first.

use std::collections::HashMap;

use crate::interner::Symbol;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

/// Field table of an instance, or of a class for its class-level fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldsId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(usize);

/// Binding of a name in an environment.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Declared with `var x;` and never assigned.
    Uninit,
    Bound(Value),
}

#[derive(Debug)]
struct EnvData {
    parent: Option<EnvId>,
    slots: HashMap<Symbol, Slot>,
}

#[derive(Debug)]
pub struct Heap {
    envs: Vec<EnvData>,
    /// Environments below this index may be referenced by a closure and are never released.
    captured: usize,
    fields: Vec<HashMap<Symbol, Value>>,
    lists: Vec<Vec<Value>>,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    /// Create a heap holding only the global environment.
    pub fn new() -> Heap {
        Heap {
            envs: vec![EnvData {
                parent: None,
                slots: HashMap::new(),
            }],
            captured: 1,
            fields: vec![],
            lists: vec![],
        }
    }

    pub fn globals(&self) -> EnvId {
        EnvId(0)
    }

    pub fn new_env(&mut self, parent: EnvId) -> EnvId {
        self.envs.push(EnvData {
            parent: Some(parent),
            slots: HashMap::new(),
        });
        EnvId(self.envs.len() - 1)
    }

    /// Mark to pass to [`Heap::release`] once the environments created from now on are dead.
    pub fn mark(&self) -> usize {
        self.envs.len()
    }

    /// Keep `env` and its ancestors alive for the life of the heap.
    pub fn capture(&mut self, env: EnvId) {
        self.captured = self.captured.max(env.0 + 1);
    }

    /// Drop the environments allocated since `mark`, except those a closure may still reach.
    ///
    /// Parents are always allocated before their children, so keeping every environment below
    /// the highest captured one keeps the whole chain of each captured environment.
    pub fn release(&mut self, mark: usize) {
        self.envs.truncate(mark.max(self.captured));
    }

    /// Bind `sym` in `env`, replacing any previous binding there.
    pub fn define(&mut self, env: EnvId, sym: Symbol, value: Value) {
        self.envs[env.0].slots.insert(sym, Slot::Bound(value));
    }

    pub fn declare(&mut self, env: EnvId, sym: Symbol) {
        self.envs[env.0].slots.insert(sym, Slot::Uninit);
    }

    /// The environment `depth` parents above `env`.
    ///
    /// The resolver guarantees the chain is deep enough; the outermost environment is returned
    /// otherwise.
    pub fn ancestor(&self, env: EnvId, depth: usize) -> EnvId {
        let mut env = env;
        for _ in 0..depth {
            match self.envs[env.0].parent {
                Some(parent) => env = parent,
                None => break,
            }
        }
        env
    }

    /// Binding of `sym` in `env` itself, ignoring enclosing environments.
    pub fn get(&self, env: EnvId, sym: &Symbol) -> Option<&Slot> {
        self.envs[env.0].slots.get(sym)
    }

    /// Assign to an existing binding of `sym` in `env`.  Returns false if there is none.
    pub fn assign(&mut self, env: EnvId, sym: &Symbol, value: Value) -> bool {
        match self.envs[env.0].slots.get_mut(sym) {
            Some(slot) => {
                *slot = Slot::Bound(value);
                true
            }
            None => false,
        }
    }

    pub fn new_fields(&mut self) -> FieldsId {
        self.fields.push(HashMap::new());
        FieldsId(self.fields.len() - 1)
    }

    pub fn field(&self, id: FieldsId, sym: &Symbol) -> Option<Value> {
        self.fields[id.0].get(sym).cloned()
    }

    pub fn set_field(&mut self, id: FieldsId, sym: Symbol, value: Value) {
        self.fields[id.0].insert(sym, value);
    }

    pub fn new_list(&mut self, elements: Vec<Value>) -> ListId {
        self.lists.push(elements);
        ListId(self.lists.len() - 1)
    }

    pub fn list(&self, id: ListId) -> &[Value] {
        &self.lists[id.0]
    }

    pub fn list_mut(&mut self, id: ListId) -> &mut Vec<Value> {
        &mut self.lists[id.0]
    }

    /// Number of live environments.
    pub fn env_count(&self) -> usize {
        self.envs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Context;

    #[test]
    fn lookup_through_ancestors() {
        let ctx = Context::new();
        let mut heap = Heap::new();
        let globals = heap.globals();
        let inner = heap.new_env(globals);
        let innermost = heap.new_env(inner);
        heap.define(globals, ctx.symbol("a"), Value::Number(1.0));

        assert_eq!(heap.ancestor(innermost, 2), globals);
        assert!(heap.get(innermost, &ctx.symbol("a")).is_none());
        match heap.get(heap.ancestor(innermost, 2), &ctx.symbol("a")) {
            Some(Slot::Bound(Value::Number(n))) if *n == 1.0 => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn assign_requires_existing_binding() {
        let ctx = Context::new();
        let mut heap = Heap::new();
        let globals = heap.globals();
        let x = ctx.symbol("x");
        assert!(!heap.assign(globals, &x, Value::Nil));
        heap.declare(globals, x.clone());
        assert!(matches!(heap.get(globals, &x), Some(Slot::Uninit)));
        assert!(heap.assign(globals, &x, Value::Bool(true)));
        assert!(matches!(heap.get(globals, &x), Some(Slot::Bound(Value::Bool(true)))));
    }

    #[test]
    fn release_keeps_captured_environments() {
        let mut heap = Heap::new();
        let globals = heap.globals();

        let mark = heap.mark();
        let block = heap.new_env(globals);
        heap.new_env(block);
        heap.release(mark);
        assert_eq!(heap.env_count(), 1);

        let mark = heap.mark();
        let outer = heap.new_env(globals);
        let closure = heap.new_env(outer);
        heap.new_env(closure);
        heap.capture(closure);
        heap.release(mark);
        assert_eq!(heap.env_count(), 3);

        // Released slots are reused.
        let mark = heap.mark();
        assert_eq!(heap.new_env(globals), EnvId(3));
        heap.release(mark);
        assert_eq!(heap.env_count(), 3);
    }

    #[test]
    fn lists_and_fields_are_shared_by_id() {
        let ctx = Context::new();
        let mut heap = Heap::new();
        let list = heap.new_list(vec![Value::Nil]);
        heap.list_mut(list).push(Value::Number(2.0));
        assert_eq!(heap.list(list).len(), 2);

        let fields = heap.new_fields();
        heap.set_field(fields, ctx.symbol("f"), Value::Number(3.0));
        assert_eq!(heap.field(fields, &ctx.symbol("f")), Some(Value::Number(3.0)));
        assert_eq!(heap.field(fields, &ctx.symbol("g")), None);
    }
}
