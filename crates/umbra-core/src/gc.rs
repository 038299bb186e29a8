//! Generational GC heap with arena-based allocation and typed indices.
//!
//! Objects live in one arena per type and belong to one of three
//! generations. Minor collections mark and sweep only the youngest
//! generation, treating mutated old objects (the barrier queue) as extra
//! roots; major collections trace the whole heap. Nothing is ever moved,
//! so handles stay valid for an object's entire life.

use crate::function::{Closure, Constant, Function};
use crate::string::{str_hash, LuaStr, StringPool};
use crate::table::Table;
use crate::value::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;

/// A typed index into an arena in the GC heap.
pub struct GcIdx<T>(u32, PhantomData<T>);

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> fmt::Debug for GcIdx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcIdx({})", self.0)
    }
}

impl<T> GcIdx<T> {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// An untyped reference to any GC-managed object, used for root
/// enumeration, tracing, and generation bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcRef {
    Str(GcIdx<LuaStr>),
    Table(GcIdx<Table>),
    Closure(GcIdx<Closure>),
    Function(GcIdx<Function>),
}

/// Object age classes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Generation {
    /// Youngest generation.
    Gen0,
    /// Mesozoic generation.
    Gen1,
    /// Oldest generation.
    Gen2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    White,
    Black,
}

struct GcHeader {
    generation: Generation,
    color: Color,
}

struct GcBox<T> {
    header: GcHeader,
    data: T,
}

/// One arena: slot storage plus a free list of reusable indices.
struct Arena<T> {
    slots: Vec<Option<GcBox<T>>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, data: T, generation: Generation) -> GcIdx<T> {
        let boxed = GcBox {
            header: GcHeader {
                generation,
                color: Color::White,
            },
            data,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(boxed);
            GcIdx(idx, PhantomData)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(boxed));
            GcIdx(idx, PhantomData)
        }
    }

    fn get(&self, idx: GcIdx<T>) -> &T {
        &self.slots[idx.0 as usize]
            .as_ref()
            .expect("object was freed")
            .data
    }

    fn get_mut(&mut self, idx: GcIdx<T>) -> &mut T {
        &mut self.slots[idx.0 as usize]
            .as_mut()
            .expect("object was freed")
            .data
    }

    fn header(&self, idx: GcIdx<T>) -> &GcHeader {
        &self.slots[idx.0 as usize]
            .as_ref()
            .expect("object was freed")
            .header
    }

    fn header_mut(&mut self, idx: GcIdx<T>) -> &mut GcHeader {
        &mut self.slots[idx.0 as usize]
            .as_mut()
            .expect("object was freed")
            .header
    }

    fn free(&mut self, idx: GcIdx<T>) {
        self.slots[idx.0 as usize] = None;
        self.free.push(idx.0);
    }

    fn is_alive(&self, idx: GcIdx<T>) -> bool {
        self.slots[idx.0 as usize].is_some()
    }
}

/// Membership list and collection trigger for one generation.
struct GenInfo {
    members: Vec<GcRef>,
    threshold: usize,
}

impl GenInfo {
    fn new(threshold: usize) -> Self {
        GenInfo {
            members: Vec::new(),
            threshold,
        }
    }
}

/// A registered callback that feeds every root reference to the visitor.
pub type RootTraveller = Box<dyn Fn(&mut dyn FnMut(GcRef))>;

const GEN0_INIT_THRESHOLD: usize = 512;
const GEN1_INIT_THRESHOLD: usize = 512;

/// The generational heap.
pub struct Gc {
    strings: Arena<LuaStr>,
    tables: Arena<Table>,
    closures: Arena<Closure>,
    functions: Arena<Function>,
    string_pool: StringPool,
    gen0: GenInfo,
    gen1: GenInfo,
    gen2: GenInfo,
    barriered: VecDeque<GcRef>,
    minor_traveller: Option<RootTraveller>,
    major_traveller: Option<RootTraveller>,
}

impl Gc {
    pub fn new() -> Self {
        Gc {
            strings: Arena::new(),
            tables: Arena::new(),
            closures: Arena::new(),
            functions: Arena::new(),
            string_pool: StringPool::new(),
            gen0: GenInfo::new(GEN0_INIT_THRESHOLD),
            gen1: GenInfo::new(GEN1_INIT_THRESHOLD),
            gen2: GenInfo::new(0),
            barriered: VecDeque::new(),
            minor_traveller: None,
            major_traveller: None,
        }
    }

    /// Register the root enumeration callbacks for minor and major
    /// collections.
    pub fn set_root_traveller(&mut self, minor: RootTraveller, major: RootTraveller) {
        self.minor_traveller = Some(minor);
        self.major_traveller = Some(major);
    }

    // ---- Allocation ----

    /// Allocate a table in the youngest generation.
    pub fn new_table(&mut self) -> GcIdx<Table> {
        self.new_table_in(Generation::Gen0)
    }

    pub fn new_table_in(&mut self, gen: Generation) -> GcIdx<Table> {
        let idx = self.tables.alloc(Table::new(), gen);
        self.gen_mut(gen).members.push(GcRef::Table(idx));
        idx
    }

    /// Allocate a closure in the youngest generation.
    pub fn new_closure(&mut self) -> GcIdx<Closure> {
        self.new_closure_in(Generation::Gen0)
    }

    pub fn new_closure_in(&mut self, gen: Generation) -> GcIdx<Closure> {
        let idx = self.closures.alloc(Closure::new(), gen);
        self.gen_mut(gen).members.push(GcRef::Closure(idx));
        idx
    }

    /// Allocate a function prototype. Prototypes are effectively immutable
    /// once generated and referenced across generations, so they are born
    /// old.
    pub fn new_function(&mut self) -> GcIdx<Function> {
        self.new_function_in(Generation::Gen2)
    }

    pub fn new_function_in(&mut self, gen: Generation) -> GcIdx<Function> {
        let idx = self.functions.alloc(Function::new(), gen);
        self.gen_mut(gen).members.push(GcRef::Function(idx));
        idx
    }

    /// Intern a string. Returns the existing object when the content is
    /// already live in any generation; otherwise allocates in the youngest.
    pub fn new_string(&mut self, bytes: &[u8]) -> GcIdx<LuaStr> {
        let hash = str_hash(bytes);
        for &slot in self.string_pool.candidates(hash) {
            let idx = GcIdx(slot, PhantomData);
            if self.strings.get(idx).as_bytes() == bytes {
                return idx;
            }
        }
        let idx = self.strings.alloc(LuaStr::new(bytes), Generation::Gen0);
        self.gen0.members.push(GcRef::Str(idx));
        self.string_pool.insert(hash, idx.index());
        idx
    }

    // ---- Object access ----

    pub fn string(&self, idx: GcIdx<LuaStr>) -> &LuaStr {
        self.strings.get(idx)
    }

    pub fn table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables.get(idx)
    }

    /// Raw mutable table access. This path performs no write barrier; use
    /// [`Gc::table_set`] unless the barrier has already been handled.
    pub fn table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables.get_mut(idx)
    }

    pub fn closure(&self, idx: GcIdx<Closure>) -> &Closure {
        self.closures.get(idx)
    }

    pub fn closure_mut(&mut self, idx: GcIdx<Closure>) -> &mut Closure {
        self.closures.get_mut(idx)
    }

    pub fn function(&self, idx: GcIdx<Function>) -> &Function {
        self.functions.get(idx)
    }

    pub fn function_mut(&mut self, idx: GcIdx<Function>) -> &mut Function {
        self.functions.get_mut(idx)
    }

    // ---- Write barrier ----

    /// True when a store into `obj` must be recorded before the next minor
    /// collection.
    pub fn needs_barrier(&self, obj: GcRef) -> bool {
        self.generation_of(obj) != Generation::Gen0
    }

    /// Record a mutated object. The next minor collection treats it as a
    /// root. Duplicates are harmless.
    pub fn set_barrier(&mut self, obj: GcRef) {
        self.barriered.push_back(obj);
    }

    /// Barrier-safe table store.
    pub fn table_set(
        &mut self,
        table: GcIdx<Table>,
        key: Value,
        value: Value,
    ) -> Result<(), &'static str> {
        let obj = GcRef::Table(table);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.tables.get_mut(table).set(key, value)
    }

    /// Barrier-safe metatable store.
    pub fn table_set_metatable(&mut self, table: GcIdx<Table>, metatable: Option<GcIdx<Table>>) {
        let obj = GcRef::Table(table);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.tables.get_mut(table).set_metatable(metatable);
    }

    /// Barrier-safe string constant registration. Prototypes are born old,
    /// so a fresh young string stored into one must be guarded or the next
    /// minor collection sweeps it.
    pub fn function_add_const_string(
        &mut self,
        func: GcIdx<Function>,
        s: GcIdx<LuaStr>,
    ) -> u32 {
        let obj = GcRef::Function(func);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.functions.get_mut(func).add_const_string(s)
    }

    /// Barrier-safe module name store.
    pub fn function_set_base_info(&mut self, func: GcIdx<Function>, module: GcIdx<LuaStr>, line: u32) {
        let obj = GcRef::Function(func);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.functions.get_mut(func).set_base_info(module, line);
    }

    /// Barrier-safe superior back-link store.
    pub fn function_set_superior(&mut self, func: GcIdx<Function>, superior: GcIdx<Function>) {
        let obj = GcRef::Function(func);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.functions.get_mut(func).set_superior(superior);
    }

    /// Barrier-safe child prototype registration.
    pub fn function_add_child(&mut self, func: GcIdx<Function>, child: GcIdx<Function>) {
        let obj = GcRef::Function(func);
        if self.needs_barrier(obj) {
            self.set_barrier(obj);
        }
        self.functions.get_mut(func).add_child(child);
    }

    // ---- Inspection ----

    pub fn is_alive(&self, r: GcRef) -> bool {
        match r {
            GcRef::Str(idx) => self.strings.is_alive(idx),
            GcRef::Table(idx) => self.tables.is_alive(idx),
            GcRef::Closure(idx) => self.closures.is_alive(idx),
            GcRef::Function(idx) => self.functions.is_alive(idx),
        }
    }

    pub fn generation_of(&self, r: GcRef) -> Generation {
        self.header(r).generation
    }

    pub fn gen_count(&self, gen: Generation) -> usize {
        self.gen_info(gen).members.len()
    }

    pub fn gen_threshold(&self, gen: Generation) -> usize {
        self.gen_info(gen).threshold
    }

    pub fn barriered_count(&self) -> usize {
        self.barriered.len()
    }

    // ---- Collection ----

    /// Run a collection if an allocation threshold has been crossed: a
    /// minor one normally, a major one when the mesozoic generation is
    /// also over its threshold.
    pub fn check_gc(&mut self) {
        if self.gen0.members.len() < self.gen0.threshold {
            return;
        }
        if self.gen1.members.len() >= self.gen1.threshold {
            self.collect_major();
        } else {
            self.collect_minor();
        }
    }

    /// Mark and sweep the youngest generation only.
    pub fn collect_minor(&mut self) {
        let mut worklist = Self::gather_roots(&self.minor_traveller);
        let barrier_set: HashSet<GcRef> = self.barriered.iter().copied().collect();
        worklist.extend(barrier_set.iter().copied());

        // Old objects are traced through only when barriered; anything else
        // outside gen0 is assumed not to reference gen0.
        let mut traced_old: HashSet<GcRef> = HashSet::new();
        while let Some(r) = worklist.pop() {
            match self.generation_of(r) {
                Generation::Gen0 => {
                    if self.color_of(r) == Color::White {
                        self.set_color(r, Color::Black);
                        self.trace_children(r, &mut worklist);
                    }
                }
                _ => {
                    if barrier_set.contains(&r) && traced_old.insert(r) {
                        self.trace_children(r, &mut worklist);
                    }
                }
            }
        }

        // Sweep: survivors are promoted, the rest destroyed.
        let members = std::mem::take(&mut self.gen0.members);
        let mut alive = 0;
        for r in members {
            if self.color_of(r) == Color::Black {
                self.set_color(r, Color::White);
                self.set_generation(r, Generation::Gen1);
                self.gen1.members.push(r);
                alive += 1;
            } else {
                self.destroy(r);
            }
        }
        self.barriered.clear();
        Self::adjust_threshold(alive, &mut self.gen0, GEN0_INIT_THRESHOLD);
    }

    /// Mark and sweep every generation.
    pub fn collect_major(&mut self) {
        let mut worklist = Self::gather_roots(&self.major_traveller);
        while let Some(r) = worklist.pop() {
            if self.color_of(r) == Color::White {
                self.set_color(r, Color::Black);
                self.trace_children(r, &mut worklist);
            }
        }

        self.sweep_generation(Generation::Gen2, None);
        let gen1_alive = self.sweep_generation(Generation::Gen1, Some(Generation::Gen2));
        let gen0_alive = self.sweep_generation(Generation::Gen0, None);

        Self::adjust_threshold(gen0_alive, &mut self.gen0, GEN0_INIT_THRESHOLD);
        Self::adjust_threshold(gen1_alive, &mut self.gen1, GEN1_INIT_THRESHOLD);

        // Swept objects must not linger in the barrier queue; surviving
        // entries may still guard old-to-young references.
        let mut barriered = std::mem::take(&mut self.barriered);
        barriered.retain(|&r| self.is_alive(r));
        self.barriered = barriered;
    }

    // ---- Internals ----

    fn gather_roots(traveller: &Option<RootTraveller>) -> Vec<GcRef> {
        let mut roots = Vec::new();
        if let Some(travel) = traveller {
            travel(&mut |r| roots.push(r));
        }
        roots
    }

    /// Sweep one generation, promoting survivors into `promote` when given.
    /// Returns the survivor count.
    fn sweep_generation(&mut self, gen: Generation, promote: Option<Generation>) -> usize {
        let members = std::mem::take(&mut self.gen_mut(gen).members);
        let mut alive = 0;
        for r in members {
            if self.color_of(r) == Color::Black {
                self.set_color(r, Color::White);
                let target = promote.unwrap_or(gen);
                self.set_generation(r, target);
                self.gen_mut(target).members.push(r);
                alive += 1;
            } else {
                self.destroy(r);
            }
        }
        alive
    }

    fn adjust_threshold(alive: usize, gen: &mut GenInfo, min_threshold: usize) {
        gen.threshold = (2 * alive).max(min_threshold);
    }

    fn trace_children(&self, r: GcRef, out: &mut Vec<GcRef>) {
        match r {
            GcRef::Str(_) => {}
            GcRef::Table(idx) => {
                let table = self.tables.get(idx);
                if let Some(mt) = table.metatable() {
                    out.push(GcRef::Table(mt));
                }
                for v in table.array_values() {
                    if let Some(child) = v.gc_ref() {
                        out.push(child);
                    }
                }
                for (k, v) in table.hash_entries() {
                    if let Some(child) = k.gc_ref() {
                        out.push(child);
                    }
                    if let Some(child) = v.gc_ref() {
                        out.push(child);
                    }
                }
            }
            GcRef::Closure(idx) => {
                let closure = self.closures.get(idx);
                if let Some(proto) = closure.prototype() {
                    out.push(GcRef::Function(proto));
                }
                for upvalue in closure.upvalues() {
                    if let Some(child) = upvalue.value.gc_ref() {
                        out.push(child);
                    }
                }
            }
            GcRef::Function(idx) => {
                let func = self.functions.get(idx);
                if let Some(module) = func.module() {
                    out.push(GcRef::Str(module));
                }
                if let Some(superior) = func.superior() {
                    out.push(GcRef::Function(superior));
                }
                for constant in func.constants() {
                    if let Constant::Str(s) = constant {
                        out.push(GcRef::Str(*s));
                    }
                }
                for child in func.children() {
                    out.push(GcRef::Function(*child));
                }
            }
        }
    }

    fn destroy(&mut self, r: GcRef) {
        match r {
            GcRef::Str(idx) => {
                let hash = self.strings.get(idx).hash();
                self.strings.free(idx);
                self.string_pool.remove(hash, idx.index());
            }
            GcRef::Table(idx) => self.tables.free(idx),
            GcRef::Closure(idx) => self.closures.free(idx),
            GcRef::Function(idx) => self.functions.free(idx),
        }
    }

    fn gen_info(&self, gen: Generation) -> &GenInfo {
        match gen {
            Generation::Gen0 => &self.gen0,
            Generation::Gen1 => &self.gen1,
            Generation::Gen2 => &self.gen2,
        }
    }

    fn gen_mut(&mut self, gen: Generation) -> &mut GenInfo {
        match gen {
            Generation::Gen0 => &mut self.gen0,
            Generation::Gen1 => &mut self.gen1,
            Generation::Gen2 => &mut self.gen2,
        }
    }

    fn header(&self, r: GcRef) -> &GcHeader {
        match r {
            GcRef::Str(idx) => self.strings.header(idx),
            GcRef::Table(idx) => self.tables.header(idx),
            GcRef::Closure(idx) => self.closures.header(idx),
            GcRef::Function(idx) => self.functions.header(idx),
        }
    }

    fn header_mut(&mut self, r: GcRef) -> &mut GcHeader {
        match r {
            GcRef::Str(idx) => self.strings.header_mut(idx),
            GcRef::Table(idx) => self.tables.header_mut(idx),
            GcRef::Closure(idx) => self.closures.header_mut(idx),
            GcRef::Function(idx) => self.functions.header_mut(idx),
        }
    }

    fn color_of(&self, r: GcRef) -> Color {
        self.header(r).color
    }

    fn set_color(&mut self, r: GcRef, color: Color) {
        self.header_mut(r).color = color;
    }

    fn set_generation(&mut self, r: GcRef, gen: Generation) {
        self.header_mut(r).generation = gen;
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}
