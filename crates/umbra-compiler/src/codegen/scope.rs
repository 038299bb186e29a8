//! Lexical scope bookkeeping for the code generator.
//!
//! All live names sit in one flat vector, partitioned into scopes by a
//! stack of records holding each scope's start index and owning function.
//! Leaving a scope truncates the vector back to the start index, so a name
//! defined only inside the scope can no longer resolve.

use umbra_core::function::Function;
use umbra_core::gc::GcIdx;
use umbra_core::string::LuaStr;

/// A named local and its register within the owning function.
#[derive(Clone, Copy, Debug)]
struct ScopeName {
    name: GcIdx<LuaStr>,
    register: u8,
}

#[derive(Clone, Copy, Debug)]
struct ScopeRecord {
    /// First index in the flat name list belonging to this scope.
    start: usize,
    owner: GcIdx<Function>,
}

/// Where a resolved name lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub register: u8,
    pub owner: GcIdx<Function>,
}

/// The scope stack over the flat name list.
#[derive(Debug, Default)]
pub struct ScopeStack {
    names: Vec<ScopeName>,
    records: Vec<ScopeRecord>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            names: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn enter(&mut self, owner: GcIdx<Function>) {
        self.records.push(ScopeRecord {
            start: self.names.len(),
            owner,
        });
    }

    /// Leave the innermost scope, dropping every name declared in it.
    pub fn leave(&mut self) {
        let record = self.records.pop().expect("mismatched scope exit");
        self.names.truncate(record.start);
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }

    pub fn current_owner(&self) -> Option<GcIdx<Function>> {
        self.records.last().map(|r| r.owner)
    }

    /// Bind `name` in the innermost scope at `register` unless it is
    /// already bound there. Returns the effective register and whether the
    /// binding is new.
    pub fn add_name(&mut self, name: GcIdx<LuaStr>, register: u8) -> (u8, bool) {
        let start = self.records.last().expect("no active scope").start;
        for entry in &self.names[start..] {
            if entry.name == name {
                return (entry.register, false);
            }
        }
        self.names.push(ScopeName { name, register });
        (register, true)
    }

    /// Resolve a name from the innermost scope outwards.
    pub fn resolve(&self, name: GcIdx<LuaStr>) -> Option<Binding> {
        let mut end = self.names.len();
        for record in self.records.iter().rev() {
            for entry in &self.names[record.start..end] {
                if entry.name == name {
                    return Some(Binding {
                        register: entry.register,
                        owner: record.owner,
                    });
                }
            }
            end = record.start;
        }
        None
    }
}
