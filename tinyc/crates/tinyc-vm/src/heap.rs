//! The per-thread garbage-collected heap.
//!
//! A slotted object table with a free list. Every live allocation occupies
//! exactly one slot; [`ObjRef`] handles index into the table. Collection is
//! mark-and-sweep:
//!
//! - **Mark** walks a worklist seeded with the caller's roots, following
//!   struct fields and the roots native objects report through
//!   [`NativeProp::protect`]. Cycles are handled naturally; an object is
//!   pushed at most once because marking happens before expansion.
//! - **Sweep** frees every unmarked slot (releasing the pooled string or
//!   running the native finalizer) and clears the mark on survivors.
//!
//! Collection is triggered by the owning thread when the live count exceeds
//! the threshold; after each sweep the threshold becomes twice the live
//! count.

use std::any::Any;

use log::debug;
use tinyc_util::{Idx, Str, StringPool};

use crate::value::{NativeProp, ObjRef, Value};

/// Initial collection threshold, in objects.
pub const INIT_GC_THRESHOLD: usize = 8;

/// Payload of a heap object.
pub enum ObjKind {
    /// A pooled string, retained for as long as this object lives.
    Str(Str),

    /// A fixed-arity record of values.
    Struct(Vec<Value>),

    /// A host object with optional GC hooks.
    Native {
        data: Box<dyn Any>,
        prop: Option<&'static NativeProp>,
    },
}

struct Obj {
    marked: bool,
    kind: ObjKind,
}

/// The heap of one thread of execution.
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    num_objects: usize,
    max_objects: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            num_objects: 0,
            max_objects: INIT_GC_THRESHOLD,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.num_objects
    }

    pub fn is_empty(&self) -> bool {
        self.num_objects == 0
    }

    /// True when the live count has crossed the collection threshold.
    pub fn should_collect(&self) -> bool {
        self.num_objects > self.max_objects
    }

    /// Allocate a new object.
    ///
    /// The caller is responsible for retaining a pooled string before
    /// wrapping it in an `ObjKind::Str`.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let obj = Obj {
            marked: false,
            kind,
        };

        self.num_objects += 1;

        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(obj);
                ObjRef(slot)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef::from_usize(self.slots.len() - 1)
            }
        }
    }

    /// The payload of a live object.
    pub fn get(&self, r: ObjRef) -> Option<&ObjKind> {
        self.slots.get(r.index())?.as_ref().map(|o| &o.kind)
    }

    /// Mutable payload of a live object.
    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut ObjKind> {
        self.slots.get_mut(r.index())?.as_mut().map(|o| &mut o.kind)
    }

    /// Run one mark-and-sweep cycle over the heap. `roots` must contain
    /// every value reachable by the mutator: stack slots, globals, retval,
    /// and anything else the thread holds. Returns the number of objects
    /// freed.
    pub fn collect<I>(&mut self, roots: I, pool: &mut StringPool) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        self.mark(roots);
        let freed = self.sweep(pool);

        self.max_objects = (self.num_objects * 2).max(INIT_GC_THRESHOLD);

        debug!(
            "gc: freed {} objects, {} live, next collection above {}",
            freed, self.num_objects, self.max_objects
        );

        freed
    }

    fn mark<I>(&mut self, roots: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut worklist: Vec<ObjRef> = roots.into_iter().filter_map(Value::obj).collect();

        while let Some(r) = worklist.pop() {
            let obj = match self.slots.get_mut(r.index()).and_then(Option::as_mut) {
                Some(obj) if !obj.marked => obj,
                _ => continue,
            };

            obj.marked = true;

            match &obj.kind {
                ObjKind::Str(_) => {}

                ObjKind::Struct(fields) => {
                    worklist.extend(fields.iter().copied().filter_map(Value::obj));
                }

                ObjKind::Native { data, prop } => {
                    let mut reported = Vec::new();
                    if let Some(protect) = prop.and_then(|p| p.protect) {
                        protect(data.as_ref(), &mut reported);
                    }
                    worklist.extend(reported.into_iter().filter_map(Value::obj));
                }
            }
        }
    }

    fn sweep(&mut self, pool: &mut StringPool) -> usize {
        let mut freed = 0;

        for i in 0..self.slots.len() {
            let dead = matches!(&self.slots[i], Some(obj) if !obj.marked);

            if dead {
                let obj = self.slots[i].take().expect("slot checked occupied");
                Self::finalize(obj.kind, pool);

                self.free.push(i as u32);
                self.num_objects -= 1;
                freed += 1;
            } else if let Some(obj) = &mut self.slots[i] {
                obj.marked = false;
            }
        }

        freed
    }

    /// Free every object unconditionally. Used at thread teardown.
    pub fn teardown(&mut self, pool: &mut StringPool) {
        for i in 0..self.slots.len() {
            if let Some(obj) = self.slots[i].take() {
                Self::finalize(obj.kind, pool);
            }
        }

        self.slots.clear();
        self.free.clear();
        self.num_objects = 0;
    }

    fn finalize(kind: ObjKind, pool: &mut StringPool) {
        match kind {
            ObjKind::Str(s) => pool.release(s),
            ObjKind::Struct(_) => {}
            ObjKind::Native { data, prop } => {
                if let Some(finalize) = prop.and_then(|p| p.finalize) {
                    finalize(data);
                }
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
