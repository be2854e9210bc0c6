#[cfg(test)]
mod test;

use std::ops::{Index, IndexMut};

use lox_bytecode::disasm::ConstantFormat;
use lox_bytecode::Chunk;
use slotmap::SlotMap;
use tracing::debug;

use crate::config::{DebugFlags, VmConfig};
use crate::table::{Key, Table};
use crate::value::{hash_str, LoxString, Obj, Val, ValDisplay};

slotmap::new_key_type! {
    /// A stable handle to an object in a [`Heap`].
    pub struct ObjRef;
}

/// Types that hold handles the collector must keep alive.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer<'_>);
}

/// Marks objects during a collection and queues them for tracing.
pub struct Tracer<'h> {
    objects: &'h mut SlotMap<ObjRef, HeapObject>,
    gray: &'h mut Vec<ObjRef>,
    log: bool,
}

impl Tracer<'_> {
    /// Mark `r` reachable. Each object is queued at most once per collection.
    pub fn mark_object(&mut self, r: ObjRef) {
        let object = match self.objects.get_mut(r) {
            Some(object) => object,
            None => return,
        };
        if object.marked {
            return;
        }
        if self.log {
            debug!(target: "lox_vm::gc", "{:?} mark {}", r, object.obj.kind_name());
        }
        object.marked = true;
        self.gray.push(r);
    }

    pub fn mark_value(&mut self, v: Val) {
        v.trace(self)
    }
}

impl Trace for () {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

impl Trace for ObjRef {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.mark_object(*self)
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self {
            item.trace(tracer)
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.as_slice().trace(tracer)
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(t) = self {
            t.trace(tracer)
        }
    }
}

impl<A: Trace + ?Sized, B: Trace + ?Sized> Trace for (&A, &B) {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.0.trace(tracer);
        self.1.trace(tracer);
    }
}

/// A chunk under construction keeps its constants alive.
impl Trace for Chunk<Val> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.constants().trace(tracer)
    }
}

/// The per-object header: mark bit and the size charged at allocation.
pub struct HeapObject {
    marked: bool,
    size: usize,
    obj: Obj,
}

/// A simple mark-and-sweep garbage collected heap.
///
/// Every allocation goes through [`Heap::alloc`], which may run a full
/// collection first. The caller passes its roots along, since the heap itself
/// doesn't know what the interpreter is holding.
pub struct Heap {
    objects: SlotMap<ObjRef, HeapObject>,

    /// Intern table. Its references are weak: unmarked strings are removed
    /// before sweeping.
    strings: Table,

    /// Worklist of marked objects whose references are not yet traced. Not
    /// charged to `bytes_allocated`.
    gray: Vec<ObjRef>,
    scratch: Vec<Val>,

    /// Total bytes charged for live objects.
    bytes_allocated: usize,

    /// The threshold for triggering a GC. Recalculated as
    /// `heap_grow_factor * bytes_allocated` after each GC.
    next_gc: usize,
    heap_grow_factor: usize,

    flags: DebugFlags,
    collections: usize,
}

impl Heap {
    pub fn new(config: &VmConfig) -> Heap {
        Heap {
            objects: SlotMap::with_key(),
            strings: Table::new(),
            gray: vec![],
            scratch: vec![],
            bytes_allocated: 0,
            next_gc: config.initial_gc_threshold,
            heap_grow_factor: config.heap_grow_factor,
            flags: config.debug,
            collections: 0,
        }
    }

    fn log_gc(&self) -> bool {
        self.flags.contains(DebugFlags::LOG_GC)
    }

    /// Move `obj` into the heap. Collects first when the threshold is exceeded
    /// or in stress mode, keeping everything reachable from `roots`.
    pub fn alloc(&mut self, obj: Obj, roots: &dyn Trace) -> ObjRef {
        let size = std::mem::size_of::<HeapObject>() + obj.extra_size();

        if self.flags.contains(DebugFlags::STRESS_GC)
            || self.bytes_allocated + size > self.next_gc
        {
            self.collect_pending(roots, Some(&obj));
        }

        self.bytes_allocated += size;
        let kind = obj.kind_name();
        let r = self.objects.insert(HeapObject {
            marked: false,
            size,
            obj,
        });
        if self.log_gc() {
            debug!(target: "lox_vm::gc", "{:?} allocate {} for {}", r, size, kind);
        }
        r
    }

    /// Intern a copy of `s`.
    pub fn intern(&mut self, s: &str, roots: &dyn Trace) -> ObjRef {
        let hash = hash_str(s);
        match self.find_interned(s, hash) {
            Some(key) => key.obj,
            None => self.insert_string(s.into(), hash, roots),
        }
    }

    /// Intern `s`, taking ownership of its buffer. The buffer is dropped if an
    /// equal string already exists.
    pub fn intern_owned(&mut self, s: String, roots: &dyn Trace) -> ObjRef {
        let hash = hash_str(&s);
        match self.find_interned(&s, hash) {
            Some(key) => key.obj,
            None => self.insert_string(s.into_boxed_str(), hash, roots),
        }
    }

    /// The interned string with content `s`, if one exists.
    pub fn lookup(&self, s: &str) -> Option<ObjRef> {
        self.find_interned(s, hash_str(s)).map(|key| key.obj)
    }

    fn find_interned(&self, s: &str, hash: u64) -> Option<Key> {
        let objects = &self.objects;
        self.strings.find_string(s, hash, |r| {
            objects
                .get(r)
                .and_then(|o| o.obj.as_string())
                .map(LoxString::as_str)
        })
    }

    fn insert_string(&mut self, chars: Box<str>, hash: u64, roots: &dyn Trace) -> ObjRef {
        let r = self.alloc(Obj::String(LoxString::new(chars, hash)), roots);
        self.strings.set(Key { obj: r, hash }, Val::Nil);
        r
    }

    /// Run a full mark-sweep collection.
    pub fn collect(&mut self, roots: &dyn Trace) {
        self.collect_pending(roots, None)
    }

    /// Collect while `pending` is about to be moved into the heap. Whatever it
    /// references is kept alive along with `roots`.
    fn collect_pending(&mut self, roots: &dyn Trace, pending: Option<&Obj>) {
        let log = self.log_gc();
        let before = self.bytes_allocated;
        if log {
            debug!(target: "lox_vm::gc", "-- gc begin");
        }

        roots.trace(&mut self.tracer());
        if let Some(obj) = pending {
            let mut refs = std::mem::take(&mut self.scratch);
            obj.references(&mut refs);
            let mut tracer = self.tracer();
            for v in refs.drain(..) {
                tracer.mark_value(v);
            }
            self.scratch = refs;
        }
        self.trace_references();

        let objects = &self.objects;
        let purged = self
            .strings
            .remove_unmarked(|r| objects.get(r).map_or(false, |o| o.marked));
        let freed = self.sweep();

        self.next_gc = self.bytes_allocated * self.heap_grow_factor;
        self.collections += 1;

        if log {
            debug!(target: "lox_vm::gc", "-- gc end");
            debug!(
                target: "lox_vm::gc",
                "   collected {} bytes (from {} to {}) next at {}; {} objects freed, {} strings purged",
                before - self.bytes_allocated,
                before,
                self.bytes_allocated,
                self.next_gc,
                freed,
                purged
            );
        }
    }

    fn tracer(&mut self) -> Tracer<'_> {
        Tracer {
            log: self.flags.contains(DebugFlags::LOG_GC),
            objects: &mut self.objects,
            gray: &mut self.gray,
        }
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            let mut refs = std::mem::take(&mut self.scratch);
            if let Some(object) = self.objects.get(r) {
                if self.flags.contains(DebugFlags::LOG_GC) {
                    debug!(target: "lox_vm::gc", "{:?} blacken {}", r, object.obj.kind_name());
                }
                object.obj.references(&mut refs);
            }
            let mut tracer = self.tracer();
            for v in refs.drain(..) {
                tracer.mark_value(v);
            }
            self.scratch = refs;
        }
    }

    /// Free every unmarked object and clear the mark bit of the rest.
    fn sweep(&mut self) -> usize {
        let log = self.log_gc();
        let mut freed_bytes = 0;
        let mut freed = 0;
        self.objects.retain(|r, object| {
            if object.marked {
                object.marked = false;
                true
            } else {
                if log {
                    debug!(target: "lox_vm::gc", "{:?} free {}", r, object.obj.kind_name());
                }
                freed_bytes += object.size;
                freed += 1;
                false
            }
        });
        self.bytes_allocated -= freed_bytes;
        freed
    }

    /// Re-charge an object whose owned buffers changed size since allocation.
    pub fn recharge(&mut self, r: ObjRef) {
        if let Some(object) = self.objects.get_mut(r) {
            let size = std::mem::size_of::<HeapObject>() + object.obj.extra_size();
            self.bytes_allocated = self.bytes_allocated - object.size + size;
            object.size = size;
        }
    }

    pub fn get(&self, r: ObjRef) -> Option<&Obj> {
        self.objects.get(r).map(|o| &o.obj)
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Obj> {
        self.objects.get_mut(r).map(|o| &mut o.obj)
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.objects.contains_key(r)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Number of collections run so far
    pub fn collections(&self) -> usize {
        self.collections
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    /// The text of a string object.
    pub fn str(&self, r: ObjRef) -> Option<&str> {
        self.get(r)?.as_string().map(LoxString::as_str)
    }

    /// The table key for a string value.
    pub fn key(&self, v: Val) -> Option<Key> {
        let r = v.as_obj()?;
        let s = self.get(r)?.as_string()?;
        Some(Key {
            obj: r,
            hash: s.hash(),
        })
    }

    pub fn is_string(&self, v: Val) -> bool {
        v.as_obj()
            .and_then(|r| self.get(r))
            .map_or(false, |o| o.as_string().is_some())
    }

    pub fn display(&self, val: Val) -> ValDisplay<'_> {
        ValDisplay { heap: self, val }
    }
}

impl Index<ObjRef> for Heap {
    type Output = Obj;

    fn index(&self, r: ObjRef) -> &Obj {
        &self.objects[r].obj
    }
}

impl IndexMut<ObjRef> for Heap {
    fn index_mut(&mut self, r: ObjRef) -> &mut Obj {
        &mut self.objects[r].obj
    }
}

impl ConstantFormat<Val> for Heap {
    fn format_constant(&self, value: &Val) -> String {
        self.display(*value).to_string()
    }

    fn capture_count(&self, value: &Val) -> usize {
        value
            .as_obj()
            .and_then(|r| self.get(r))
            .and_then(Obj::as_function)
            .map_or(0, |f| f.upvalue_count)
    }
}
