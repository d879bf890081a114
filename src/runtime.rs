use super::atom::{Atom, AtomTable, BlobId, BlobType};
use super::collector::{Collect, CollectOutcome, Collector, RootSet, TermGcGuard};
use super::config::Config;
use super::error::{AllocError, AtomError, ConfigError};
use super::metrics::Metrics;
use super::monitor::Monitor;
use super::mutator::Mutator;
use super::pool::Heap;

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// A heap and the atom table built on top of it.
///
/// Nothing here is process global, so several runtimes can live side by
/// side. Threads that allocate or intern often should [`Runtime::attach`]
/// and work through their [`Mutator`]; the methods on the runtime itself go
/// through the global pool and are meant for setup and for threads that
/// hold no atoms.
pub struct Runtime {
    heap: Arc<Heap>,
    atoms: Arc<AtomTable>,
    collector: Arc<Collector>,
    monitor: Arc<Monitor<Collector>>,
    config: Config,
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop_monitor();
        self.collector.wait_for_collection();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let heap = Arc::new(Heap::build(&config));
        let atoms = Arc::new(AtomTable::build(&heap, &config));
        let collector = Arc::new(Collector::new(atoms.clone(), config.mark_timeout));
        let monitor = Arc::new(Monitor::new(collector.clone(), &config));
        let runtime = Self {
            heap,
            atoms,
            collector,
            monitor,
            config,
        };

        if config.monitor_on {
            runtime.start_monitor();
        }

        runtime
    }

    /// Registers the calling thread with its roots. The returned mutator
    /// belongs to this thread until it is dropped.
    pub fn attach<R: RootSet + 'static>(&self, roots: R) -> Mutator {
        Mutator::new(&self.heap, &self.collector, Box::new(roots))
    }

    /// Interns every name as text and makes all atoms interned so far
    /// permanent.
    pub fn init_builtins(&self, names: &[&str]) -> Result<Vec<Atom>, AtomError> {
        let atoms = names
            .iter()
            .map(|name| self.atoms.intern_str(name))
            .collect::<Result<Vec<_>, _>>()?;

        self.atoms.lock_atoms();

        Ok(atoms)
    }

    pub fn lock_atoms(&self) {
        self.atoms.lock_atoms();
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    pub fn get_config(&self) -> Config {
        self.config
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.heap.alloc(size)
    }

    /// # Safety
    /// `ptr` must have come from an allocation of `size` bytes on this
    /// runtime and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.heap.free(ptr, size);
    }

    /// Replaces the default out of memory behavior, which logs and aborts.
    /// If the hook returns, the failing allocation reports
    /// [`AllocError::OOM`].
    pub fn set_out_of_memory_hook<F>(&self, hook: F)
    where
        F: Fn(Layout) + Send + Sync + 'static,
    {
        self.heap.set_out_of_memory_hook(hook);
    }

    pub fn intern(&self, bytes: &[u8], blob: BlobId) -> Result<(Atom, bool), AtomError> {
        self.atoms.intern(bytes, blob)
    }

    pub fn intern_str(&self, text: &str) -> Result<Atom, AtomError> {
        self.atoms.intern_str(text)
    }

    pub fn lookup_text(&self, atom: Atom) -> Result<Vec<u8>, AtomError> {
        self.atoms.lookup_text(atom)
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

    pub fn register_blob_type(&self, blob: BlobType) -> Result<BlobId, AtomError> {
        self.atoms.register_blob_type(blob)
    }

    pub fn request_collection(&self) -> bool {
        self.atoms.request_collection()
    }

    /// Runs a full atom collection now. On a thread that holds a live
    /// [`Mutator`] this only raises a request and returns
    /// [`CollectOutcome::Deferred`]; use [`Mutator::collect`] there.
    pub fn collect_atoms(&self) -> CollectOutcome {
        self.collector.collect()
    }

    pub fn term_gc(&self) -> TermGcGuard<'_> {
        self.collector.term_gc()
    }

    pub fn start_monitor(&self) {
        self.collector.set_background(true);
        self.monitor.clone().start();
    }

    pub fn stop_monitor(&self) {
        self.monitor.stop();
        self.collector.set_background(false);
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            atoms: self.atoms.len(),
            builtin_atoms: self.atoms.builtin_count(),
            atom_buckets: self.atoms.bucket_count(),
            atom_bytes: self.atoms.bytes_used(),
            bytes_in_use: self.heap.bytes_in_use(),
            bytes_reserved: self.heap.reserved_bytes(),
            chunks: self.heap.chunk_count(),
            collections: self.collector.get_collections(),
            atoms_collected: self.collector.get_collected_total(),
            atoms_collected_last: self.collector.get_collected_last(),
            deferred_collections: self.collector.get_deferred(),
            last_collect_time: self.collector.get_last_collect_time(),
            collect_avg_time: self.collector.get_collect_avg_time(),
            mutators: self.collector.mutator_count(),
            state: self.collector.get_state(),
            monitor_is_on: self.monitor.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RootStack;

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            atom_buckets: 3,
            ..Config::default()
        };

        assert!(matches!(Runtime::with_config(config), Err(ConfigError::Buckets)));
    }

    #[test]
    fn keeps_its_config() {
        let config = Config {
            agc_margin: 7,
            ..Config::default()
        };
        let runtime = Runtime::with_config(config).unwrap();

        assert_eq!(runtime.get_config().agc_margin, 7);
    }

    #[test]
    fn builtins_are_locked() {
        let runtime = Runtime::new();
        let builtins = runtime.init_builtins(&["[]", "true", "false"]).unwrap();
        let metrics = runtime.metrics();

        assert_eq!(builtins.len(), 3);
        assert_eq!(metrics.atoms, 3);
        assert_eq!(metrics.builtin_atoms, 3);
    }

    #[test]
    fn attach_counts_threads() {
        let runtime = Runtime::new();
        let mutator = runtime.attach(RootStack::new());

        assert_eq!(runtime.metrics().mutators, 1);
        drop(mutator);
        assert_eq!(runtime.metrics().mutators, 0);
    }

    #[test]
    fn monitor_toggles() {
        let config = Config {
            monitor_on: true,
            ..Config::default()
        };
        let runtime = Runtime::with_config(config).unwrap();

        assert!(runtime.metrics().monitor_is_on);
        runtime.stop_monitor();
        assert!(!runtime.metrics().monitor_is_on);
    }

    #[test]
    fn installed_hook_turns_exhaustion_into_an_error() {
        let runtime = Runtime::new();

        runtime.set_out_of_memory_hook(|_| {});

        assert_eq!(runtime.alloc(isize::MAX as usize / 2), Err(AllocError::OOM));
        assert_eq!(runtime.alloc(0), Err(AllocError::BadRequest));
    }

    #[test]
    fn global_alloc_round_trip() {
        let runtime = Runtime::new();
        let ptr = runtime.alloc(48).unwrap();

        assert!(runtime.metrics().bytes_in_use >= 48);
        unsafe { runtime.free(ptr, 48) };
        assert_eq!(runtime.metrics().bytes_in_use, 0);
    }
}
