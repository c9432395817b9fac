use crate::runtime::{Function, HashPairs, Value};
use log::debug;
use std::{
    cell::{BorrowError, RefCell},
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt, mem,
    rc::{Rc, Weak},
};

const MIN_COLLECTION: usize = 256;

#[derive(Default)]
struct Scope {
    bindings: HashMap<String, Value>,
    outer: Option<Environment>,
}

/// A shared handle to one scope in a chain of lexical scopes.
///
/// Cloning the handle aliases the scope, which is how closures capture their
/// defining environment by reference.
#[derive(Clone, Default)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child scope whose lookups fall back to `outer`.
    pub fn enclosed(outer: &Environment) -> Self {
        debug!("entering enclosed scope");
        Self(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            outer: Some(outer.clone()),
        })))
    }

    /// Looks `name` up in this scope, then outward through enclosing scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        match scope.bindings.get(name) {
            Some(value) => Some(value.clone()),
            None => scope.outer.as_ref().and_then(|outer| outer.get(name)),
        }
    }

    /// Binds `name` in this scope only, shadowing any binding further out.
    pub fn set(&self, name: &str, value: Value) -> Value {
        debug_assert!(!name.is_empty(), "environment bindings must be named");
        self.0
            .borrow_mut()
            .bindings
            .insert(name.to_string(), value.clone());
        value
    }

    #[cfg(test)]
    fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scope = self.0.borrow();
        let mut names: Vec<&String> = scope.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("enclosed", &scope.outer.is_some())
            .finish()
    }
}

/// Frees scopes that are kept alive only by cycles between a scope and the
/// closures bound in it.
///
/// A collection walks every scope, array, hash and function reachable from
/// the tracked scopes and counts how many of each object's strong references
/// come from inside that graph. An object with more references than that is
/// held from outside, by a caller's handle or a frame still running, and is a
/// root. Scopes, arrays and hashes no root reaches are emptied, which breaks
/// their cycles and lets `Rc` release them.
#[derive(Default)]
pub struct ScopeTracker {
    scopes: Vec<Weak<RefCell<Scope>>>,
    next_collection: usize,
}

impl ScopeTracker {
    /// Starts tracking a freshly created scope, collecting first once enough
    /// scopes have piled up since the last collection.
    pub fn track(&mut self, env: &Environment) {
        if self.scopes.len() >= self.next_collection.max(MIN_COLLECTION) {
            self.collect();
            self.next_collection = self.scopes.len() * 2;
        }
        self.scopes.push(Rc::downgrade(&env.0));
    }

    /// Tracks a scope created outside the evaluator, such as a global scope
    /// that may already be tracked.
    pub fn adopt(&mut self, env: &Environment) {
        let ptr = Rc::as_ptr(&env.0);
        if !self.scopes.iter().any(|scope| scope.as_ptr() == ptr) {
            self.scopes.push(Rc::downgrade(&env.0));
        }
    }

    pub fn live(&self) -> usize {
        self.scopes
            .iter()
            .filter(|scope| scope.strong_count() > 0)
            .count()
    }

    /// Runs a collection and returns the number of scopes it emptied.
    pub fn collect(&mut self) -> usize {
        self.scopes.retain(|scope| scope.strong_count() > 0);

        let freed = {
            let mut graph = Graph::default();
            for scope in self.scopes.iter().filter_map(Weak::upgrade) {
                graph.insert(Object::Scope(scope));
            }

            match graph.expand() {
                Ok(()) => graph.sweep(),
                Err(_) => {
                    debug!("skipping scope collection, a scope is borrowed");
                    0
                }
            }
        };

        self.scopes.retain(|scope| scope.strong_count() > 0);
        debug!(
            "collected {} scopes, {} still tracked",
            freed,
            self.scopes.len()
        );
        freed
    }
}

enum Object {
    Scope(Rc<RefCell<Scope>>),
    Function(Rc<Function>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashPairs>>),
}

impl Object {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Function(function) => Some(Object::Function(Rc::clone(function))),
            Value::Array(elements) => Some(Object::Array(Rc::clone(elements))),
            Value::Hash(pairs) => Some(Object::Hash(Rc::clone(pairs))),
            _ => None,
        }
    }

    fn id(&self) -> usize {
        match self {
            Object::Scope(scope) => Rc::as_ptr(scope) as *const () as usize,
            Object::Function(function) => Rc::as_ptr(function) as *const () as usize,
            Object::Array(elements) => Rc::as_ptr(elements) as *const () as usize,
            Object::Hash(pairs) => Rc::as_ptr(pairs) as *const () as usize,
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Object::Scope(scope) => Rc::strong_count(scope),
            Object::Function(function) => Rc::strong_count(function),
            Object::Array(elements) => Rc::strong_count(elements),
            Object::Hash(pairs) => Rc::strong_count(pairs),
        }
    }

    /// One entry per strong reference this object holds.
    fn children(&self) -> Result<Vec<Object>, BorrowError> {
        let mut children = Vec::new();
        match self {
            Object::Scope(scope) => {
                let scope = scope.try_borrow()?;
                if let Some(outer) = &scope.outer {
                    children.push(Object::Scope(Rc::clone(&outer.0)));
                }
                children.extend(scope.bindings.values().filter_map(Object::from_value));
            }
            Object::Function(function) => {
                children.push(Object::Scope(Rc::clone(&function.env.0)));
            }
            Object::Array(elements) => {
                children.extend(elements.try_borrow()?.iter().filter_map(Object::from_value));
            }
            Object::Hash(pairs) => {
                children.extend(
                    pairs
                        .try_borrow()?
                        .values()
                        .filter_map(|pair| Object::from_value(&pair.value)),
                );
            }
        }
        Ok(children)
    }

    /// Drops everything the object holds. Returns true for an emptied scope.
    fn clear(&self) -> bool {
        match self {
            Object::Scope(scope) => scope
                .try_borrow_mut()
                .map(|mut scope| (mem::take(&mut scope.bindings), scope.outer.take()))
                .is_ok(),
            Object::Array(elements) => {
                let _taken = elements.try_borrow_mut().map(|mut elements| mem::take(&mut *elements));
                false
            }
            Object::Hash(pairs) => {
                let _taken = pairs.try_borrow_mut().map(|mut pairs| mem::take(&mut *pairs));
                false
            }
            Object::Function(_) => false,
        }
    }
}

struct Node {
    object: Object,
    edges: Vec<usize>,
}

// Holds exactly one strong reference to every object it has seen
#[derive(Default)]
struct Graph {
    nodes: HashMap<usize, Node>,
    pending: Vec<usize>,
}

impl Graph {
    fn insert(&mut self, object: Object) -> usize {
        let id = object.id();
        if let Entry::Vacant(entry) = self.nodes.entry(id) {
            entry.insert(Node {
                object,
                edges: Vec::new(),
            });
            self.pending.push(id);
        }
        id
    }

    fn expand(&mut self) -> Result<(), BorrowError> {
        while let Some(id) = self.pending.pop() {
            let children = match self.nodes.get(&id) {
                Some(node) => node.object.children()?,
                None => continue,
            };
            let edges: Vec<usize> = children
                .into_iter()
                .map(|child| self.insert(child))
                .collect();
            if let Some(node) = self.nodes.get_mut(&id) {
                node.edges = edges;
            }
        }
        Ok(())
    }

    fn sweep(&self) -> usize {
        let mut internal: HashMap<usize, usize> = HashMap::new();
        for node in self.nodes.values() {
            for edge in &node.edges {
                *internal.entry(*edge).or_default() += 1;
            }
        }

        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .filter(|(id, node)| {
                node.object.strong_count() > 1 + internal.get(*id).copied().unwrap_or(0)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut reachable = HashSet::new();
        while let Some(id) = pending.pop() {
            if reachable.insert(id) {
                if let Some(node) = self.nodes.get(&id) {
                    pending.extend(node.edges.iter().copied());
                }
            }
        }

        self.nodes
            .iter()
            .filter(|(id, _)| !reachable.contains(*id))
            .filter(|(_, node)| node.object.clear())
            .count()
    }
}
