//! Hybrid array+hash table.

use crate::gc::{GcIdx, GcRef};
use crate::value::Value;
use indexmap::IndexMap;

/// A key in the hash part of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Number key, stored as raw bits for hashing. NaN is rejected before
    /// a key is built.
    Number(u64),
    Str(GcIdx<crate::string::LuaStr>),
    Bool(bool),
    /// Table or closure key, compared by heap identity.
    Obj(GcRef),
}

impl TableKey {
    /// The heap reference behind this key, if any.
    pub fn gc_ref(&self) -> Option<GcRef> {
        match self {
            TableKey::Number(_) | TableKey::Bool(_) => None,
            TableKey::Str(idx) => Some(GcRef::Str(*idx)),
            TableKey::Obj(r) => Some(*r),
        }
    }
}

/// An associative container: dense array part for small positive integer
/// keys, insertion-ordered hash part for the rest.
pub struct Table {
    /// Array part (1-indexed: array[0] corresponds to key 1).
    array: Vec<Value>,
    hash: IndexMap<TableKey, Value>,
    metatable: Option<GcIdx<Table>>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            array: Vec::new(),
            hash: IndexMap::new(),
            metatable: None,
        }
    }

    /// Raw get by value key.
    pub fn get(&self, key: Value) -> Value {
        if let Some(idx) = array_index(key) {
            if idx <= self.array.len() {
                return self.array[idx - 1];
            }
        }
        if let Some(tk) = value_to_key(key) {
            self.hash.get(&tk).copied().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        }
    }

    /// Raw set by value key.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        if key.is_nil() {
            return Err("table index is nil");
        }
        if matches!(key, Value::Number(n) if n.is_nan()) {
            return Err("table index is NaN");
        }

        if let Some(idx) = array_index(key) {
            if idx <= self.array.len() {
                self.array[idx - 1] = value;
                return Ok(());
            }
            // Extend the array when appending
            if idx == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.rehash_from_hash_to_array();
                return Ok(());
            }
        }

        let tk = value_to_key(key).expect("key was checked above");
        if value.is_nil() {
            self.hash.shift_remove(&tk);
        } else {
            self.hash.insert(tk, value);
        }
        Ok(())
    }

    /// The border: largest n such that t[n] is non-nil and t[n+1] is nil.
    pub fn len(&self) -> i64 {
        if self.array.is_empty() {
            return 0;
        }
        if !self.array.last().unwrap().is_nil() {
            return self.array.len() as i64;
        }
        let mut lo = 0usize;
        let mut hi = self.array.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.array[mid].is_nil() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as i64
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(Value::is_nil) && self.hash.is_empty()
    }

    pub fn metatable(&self) -> Option<GcIdx<Table>> {
        self.metatable
    }

    pub fn set_metatable(&mut self, metatable: Option<GcIdx<Table>>) {
        self.metatable = metatable;
    }

    /// Iterate over the array part (for GC traversal).
    pub fn array_values(&self) -> &[Value] {
        &self.array
    }

    /// Iterate over the hash part (for GC traversal).
    pub fn hash_entries(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.hash.iter()
    }

    /// Move consecutive integer entries from hash into array.
    fn rehash_from_hash_to_array(&mut self) {
        loop {
            let next_key = TableKey::Number((self.array.len() as f64 + 1.0).to_bits());
            if let Some(v) = self.hash.shift_remove(&next_key) {
                self.array.push(v);
            } else {
                break;
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash.len()
        )
    }
}

/// Array slot for positive integral number keys within usize range.
fn array_index(key: Value) -> Option<usize> {
    match key {
        Value::Number(n) if n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64 => {
            Some(n as usize)
        }
        _ => None,
    }
}

/// Convert a value to a hash key.
fn value_to_key(v: Value) -> Option<TableKey> {
    match v {
        Value::Nil => None,
        Value::Number(n) => {
            if n.is_nan() {
                None
            } else {
                Some(TableKey::Number(n.to_bits()))
            }
        }
        Value::Bool(b) => Some(TableKey::Bool(b)),
        Value::Str(idx) => Some(TableKey::Str(idx)),
        Value::Table(idx) => Some(TableKey::Obj(GcRef::Table(idx))),
        Value::Closure(idx) => Some(TableKey::Obj(GcRef::Closure(idx))),
    }
}
