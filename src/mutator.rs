use super::atom::{Atom, AtomTable, BlobId};
use super::collector::{CollectOutcome, Collector, RootSet};
use super::error::{AllocError, AtomError};
use super::pool::{Heap, LocalPool};

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// A thread's handle on a runtime.
///
/// A mutator owns the thread's allocation pool and the thread's roots. Every
/// allocation and intern goes through a safe point, where the mutator
/// answers pending mark requests and may run a requested collection.
/// Dropping the mutator merges its pool into the global pool and removes its
/// roots from future collections.
pub struct Mutator {
    id: u64,
    pool: RefCell<LocalPool>,
    roots: Box<dyn RootSet>,
    atoms: Arc<AtomTable>,
    collector: Arc<Collector>,
    last_epoch: Cell<u64>,
    // the collector knows a mutator by the thread that attached it
    _not_send: PhantomData<*const ()>,
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.collector
            .deregister_mutator(self.id, self.last_epoch.get());
    }
}

impl Mutator {
    pub(crate) fn new(heap: &Arc<Heap>, collector: &Arc<Collector>, roots: Box<dyn RootSet>) -> Self {
        Self {
            id: collector.register_mutator(),
            pool: RefCell::new(heap.local_pool()),
            roots,
            atoms: collector.atoms().clone(),
            collector: collector.clone(),
            last_epoch: Cell::new(0),
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn heap(&self) -> Arc<Heap> {
        self.pool.borrow().heap().clone()
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.safe_point();
        self.pool.borrow_mut().alloc(size)
    }

    /// # Safety
    /// `ptr` must have come from an allocation of `size` bytes on the same
    /// runtime and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.pool.borrow_mut().free(ptr, size);
    }

    pub fn intern(&self, bytes: &[u8], blob: BlobId) -> Result<(Atom, bool), AtomError> {
        self.safe_point();
        self.atoms.intern(bytes, blob)
    }

    pub fn intern_str(&self, text: &str) -> Result<Atom, AtomError> {
        self.safe_point();
        self.atoms.intern_str(text)
    }

    pub fn lookup(&self, bytes: &[u8], blob: BlobId) -> Option<Atom> {
        self.safe_point();
        self.atoms.lookup(bytes, blob)
    }

    pub fn lookup_str(&self, atom: Atom) -> Result<String, AtomError> {
        self.atoms.lookup_str(atom)
    }

    pub fn register_atom(&self, atom: Atom) -> Result<(), AtomError> {
        self.atoms.register_atom(atom)
    }

    pub fn unregister_atom(&self, atom: Atom) -> Result<(), AtomError> {
        self.atoms.unregister_atom(atom)
    }

    /// Answers a pending mark request with this thread's roots. If a
    /// collection was requested and no monitor runs them, this thread runs
    /// it.
    ///
    /// Threads that compute for a long time without allocating or interning
    /// should call this now and then, or collections will time out waiting
    /// for them.
    pub fn safe_point(&self) {
        let epoch = self.collector.marking_epoch();

        if epoch != 0 && epoch != self.last_epoch.get() {
            self.last_epoch.set(epoch);
            self.collector.report_roots(self.id, epoch, self.roots.as_ref());
        }

        if self.atoms.collection_requested() && !self.collector.runs_in_background() {
            self.collector.collect_from(self.id, self.roots.as_ref(), true);
        }
    }

    /// Runs a full atom collection from this thread, with this thread's
    /// roots marked directly.
    pub fn collect(&self) -> CollectOutcome {
        self.collector.collect_from(self.id, self.roots.as_ref(), false)
    }
}
