//! Generational collection scenarios: promotion, barriers, thresholds,
//! and reachability safety.

use std::cell::RefCell;
use std::rc::Rc;
use umbra_core::gc::{Gc, GcRef, Generation};
use umbra_core::value::Value;

/// A heap whose roots are an externally owned list of references.
fn gc_with_roots() -> (Gc, Rc<RefCell<Vec<GcRef>>>) {
    let mut gc = Gc::new();
    let roots = Rc::new(RefCell::new(Vec::new()));
    let minor = Rc::clone(&roots);
    let major = Rc::clone(&roots);
    gc.set_root_traveller(
        Box::new(move |visit| minor.borrow().iter().for_each(|&r| visit(r))),
        Box::new(move |visit| major.borrow().iter().for_each(|&r| visit(r))),
    );
    (gc, roots)
}

#[test]
fn test_minor_sweeps_unreachable_young_objects() {
    let (mut gc, _roots) = gc_with_roots();
    let mut tables = Vec::new();
    for _ in 0..1000 {
        tables.push(gc.new_table());
    }
    assert_eq!(gc.gen_count(Generation::Gen0), 1000);

    gc.check_gc();

    assert_eq!(gc.gen_count(Generation::Gen0), 0);
    assert_eq!(gc.gen_count(Generation::Gen1), 0);
    for t in tables {
        assert!(!gc.is_alive(GcRef::Table(t)));
    }
}

#[test]
fn test_reachable_table_promoted_once_per_minor() {
    let (mut gc, roots) = gc_with_roots();
    let t = gc.new_table();
    roots.borrow_mut().push(GcRef::Table(t));

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(t)));
    assert_eq!(gc.generation_of(GcRef::Table(t)), Generation::Gen1);
    assert_eq!(gc.gen_count(Generation::Gen1), 1);

    // A second minor collection leaves the mesozoic generation alone
    gc.collect_minor();
    assert_eq!(gc.generation_of(GcRef::Table(t)), Generation::Gen1);
    assert_eq!(gc.gen_count(Generation::Gen1), 1);
}

#[test]
fn test_barrier_keeps_young_referent_alive() {
    let (mut gc, roots) = gc_with_roots();
    let a = gc.new_table_in(Generation::Gen2);
    let b = gc.new_table();
    roots.borrow_mut().push(GcRef::Table(a));

    gc.table_set(a, Value::Number(1.0), Value::Table(b)).unwrap();
    assert_eq!(gc.barriered_count(), 1);

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(b)));
    assert_eq!(gc.generation_of(GcRef::Table(b)), Generation::Gen1);
    assert_eq!(gc.barriered_count(), 0);

    // Sever the reference and drop the root: a major collection takes both
    gc.table_set(a, Value::Number(1.0), Value::Nil).unwrap();
    roots.borrow_mut().clear();
    gc.collect_major();
    assert!(!gc.is_alive(GcRef::Table(a)));
    assert!(!gc.is_alive(GcRef::Table(b)));
    assert_eq!(gc.gen_count(Generation::Gen1), 0);
    assert_eq!(gc.gen_count(Generation::Gen2), 0);
}

#[test]
fn test_missing_barrier_loses_young_referent() {
    let (mut gc, roots) = gc_with_roots();
    let a = gc.new_table_in(Generation::Gen2);
    let b = gc.new_table();
    roots.borrow_mut().push(GcRef::Table(a));

    // Store the reference behind the collector's back
    gc.table_mut(a)
        .set(Value::Number(1.0), Value::Table(b))
        .unwrap();
    assert_eq!(gc.barriered_count(), 0);

    gc.collect_minor();
    assert!(!gc.is_alive(GcRef::Table(b)));

    // The old table still holds the stale reference; a proper store through
    // the barrier would have kept it reachable
    assert!(gc.is_alive(GcRef::Table(a)));
}

#[test]
fn test_duplicate_barrier_entries_are_harmless() {
    let (mut gc, roots) = gc_with_roots();
    let a = gc.new_table_in(Generation::Gen2);
    let b = gc.new_table();
    roots.borrow_mut().push(GcRef::Table(a));

    gc.table_set(a, Value::Number(1.0), Value::Table(b)).unwrap();
    gc.table_set(a, Value::Number(2.0), Value::Table(b)).unwrap();
    gc.set_barrier(GcRef::Table(a));
    assert_eq!(gc.barriered_count(), 3);

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(b)));
}

#[test]
fn test_minor_threshold_tracks_survivors() {
    let (mut gc, roots) = gc_with_roots();
    for _ in 0..600 {
        let t = gc.new_table();
        roots.borrow_mut().push(GcRef::Table(t));
    }
    gc.collect_minor();
    assert_eq!(gc.gen_count(Generation::Gen1), 600);
    assert_eq!(gc.gen_threshold(Generation::Gen0), 1200);

    // With nothing surviving the threshold falls back to the floor
    roots.borrow_mut().clear();
    for _ in 0..10 {
        gc.new_table();
    }
    gc.collect_minor();
    assert_eq!(gc.gen_threshold(Generation::Gen0), 512);
}

#[test]
fn test_check_gc_escalates_to_major_when_gen1_full() {
    let (mut gc, roots) = gc_with_roots();
    for _ in 0..600 {
        let t = gc.new_table();
        roots.borrow_mut().push(GcRef::Table(t));
    }
    gc.collect_minor();
    assert_eq!(gc.gen_count(Generation::Gen1), 600);

    // Young pressure with a crowded mesozoic generation forces a major
    // collection; the rooted survivors move into the old generation
    for _ in 0..1200 {
        gc.new_table();
    }
    gc.check_gc();
    assert_eq!(gc.gen_count(Generation::Gen0), 0);
    assert_eq!(gc.gen_count(Generation::Gen1), 0);
    assert_eq!(gc.gen_count(Generation::Gen2), 600);
    assert_eq!(gc.gen_threshold(Generation::Gen1), 1200);
}

#[test]
fn test_reference_chain_stays_reachable() {
    let (mut gc, roots) = gc_with_roots();
    let t1 = gc.new_table();
    let t2 = gc.new_table();
    let t3 = gc.new_table();
    gc.table_set(t2, Value::Number(1.0), Value::Table(t3)).unwrap();
    gc.table_set(t1, Value::Number(1.0), Value::Table(t2)).unwrap();
    roots.borrow_mut().push(GcRef::Table(t1));

    gc.collect_minor();
    for t in [t1, t2, t3] {
        assert!(gc.is_alive(GcRef::Table(t)));
        assert_eq!(gc.generation_of(GcRef::Table(t)), Generation::Gen1);
    }

    gc.collect_major();
    for t in [t1, t2, t3] {
        assert!(gc.is_alive(GcRef::Table(t)));
        assert_eq!(gc.generation_of(GcRef::Table(t)), Generation::Gen2);
    }

    roots.borrow_mut().clear();
    gc.collect_major();
    for t in [t1, t2, t3] {
        assert!(!gc.is_alive(GcRef::Table(t)));
    }
}

#[test]
fn test_table_keys_are_traced() {
    let (mut gc, roots) = gc_with_roots();
    let t = gc.new_table();
    let key = gc.new_string(b"key");
    let inner = gc.new_table();
    gc.table_set(t, Value::Table(inner), Value::Bool(true)).unwrap();
    gc.table_set(t, Value::Str(key), Value::Number(1.0)).unwrap();
    roots.borrow_mut().push(GcRef::Table(t));

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Str(key)));
    assert!(gc.is_alive(GcRef::Table(inner)));
}

#[test]
fn test_metatable_is_traced() {
    let (mut gc, roots) = gc_with_roots();
    let t = gc.new_table();
    let mt = gc.new_table();
    gc.table_set_metatable(t, Some(mt));
    roots.borrow_mut().push(GcRef::Table(t));

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(mt)));
    assert_eq!(gc.generation_of(GcRef::Table(mt)), Generation::Gen1);
}

#[test]
fn test_closure_keeps_prototype_and_upvalues() {
    let (mut gc, roots) = gc_with_roots();
    let func = gc.new_function();
    let upvalue_table = gc.new_table();
    let closure = gc.new_closure();
    {
        let cl = gc.closure_mut(closure);
        cl.set_prototype(func);
        cl.add_upvalue(
            Value::Table(upvalue_table),
            umbra_core::function::UpvalueKind::Stack,
        );
    }
    roots.borrow_mut().push(GcRef::Closure(closure));

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(upvalue_table)));

    gc.collect_major();
    assert!(gc.is_alive(GcRef::Function(func)));
    assert!(gc.is_alive(GcRef::Closure(closure)));

    roots.borrow_mut().clear();
    gc.collect_major();
    assert!(!gc.is_alive(GcRef::Function(func)));
    assert!(!gc.is_alive(GcRef::Closure(closure)));
    assert!(!gc.is_alive(GcRef::Table(upvalue_table)));
}

#[test]
fn test_prototypes_ignored_by_minor_collection() {
    let (mut gc, _roots) = gc_with_roots();
    let func = gc.new_function();
    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Function(func)));
    assert_eq!(gc.generation_of(GcRef::Function(func)), Generation::Gen2);
}

#[test]
fn test_barriered_prototype_protects_young_constants() {
    let (mut gc, _roots) = gc_with_roots();
    let func = gc.new_function();
    let s = gc.new_string(b"literal");
    gc.function_add_const_string(func, s);

    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Str(s)));
    assert_eq!(gc.generation_of(GcRef::Str(s)), Generation::Gen1);

    // Once promoted the constant no longer depends on the barrier
    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Str(s)));
}

#[test]
fn test_swept_string_leaves_intern_pool() {
    let (mut gc, roots) = gc_with_roots();
    let s = gc.new_string(b"transient");
    gc.collect_minor();
    assert!(!gc.is_alive(GcRef::Str(s)));

    // Interning the same bytes again builds a fresh live object
    let s2 = gc.new_string(b"transient");
    assert!(gc.is_alive(GcRef::Str(s2)));
    assert_eq!(gc.string(s2).as_bytes(), b"transient");
    roots.borrow_mut().push(GcRef::Str(s2));
    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Str(s2)));
}

#[test]
fn test_dead_barrier_entries_purged_by_major() {
    let (mut gc, _roots) = gc_with_roots();
    let a = gc.new_table_in(Generation::Gen2);
    gc.table_set(a, Value::Number(1.0), Value::Bool(true)).unwrap();
    assert_eq!(gc.barriered_count(), 1);

    // Nothing roots `a`, so the major collection sweeps it and must not
    // leave its barrier entry behind
    gc.collect_major();
    assert!(!gc.is_alive(GcRef::Table(a)));
    assert_eq!(gc.barriered_count(), 0);

    gc.collect_minor();
}

#[test]
fn test_minor_does_not_trace_unbarriered_old_objects() {
    let (mut gc, roots) = gc_with_roots();
    let old = gc.new_table_in(Generation::Gen2);
    let young = gc.new_table();
    gc.table_set(old, Value::Number(1.0), Value::Table(young))
        .unwrap();
    roots.borrow_mut().push(GcRef::Table(old));

    // First minor: the barrier entry carries the edge
    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(young)));

    // The promoted referent is out of gen0 now; with the queue cleared the
    // old table is opaque to the next minor collection, which is fine
    gc.collect_minor();
    assert!(gc.is_alive(GcRef::Table(young)));
}
