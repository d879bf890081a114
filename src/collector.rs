use super::atom::{Atom, AtomTable};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GcState {
    Idle,
    /// Idle, with a collection request pending.
    Requested,
    Marking,
    Sweeping,
}

impl GcState {
    fn from_u8(state: u8) -> Self {
        match state {
            2 => GcState::Marking,
            3 => GcState::Sweeping,
            _ => GcState::Idle,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectOutcome {
    /// A full cycle ran and destroyed this many atoms.
    Collected(usize),
    /// The cycle could not run or could not finish marking. The request
    /// stays raised or is raised again by later allocation pressure.
    Deferred,
    /// There was nothing worth collecting, or atom GC is disabled.
    NotNeeded,
}

/// Everything reachable from a thread's execution state.
///
/// The collector calls `mark_roots` at most once per thread per cycle, on
/// that thread, from one of its safe points.
pub trait RootSet: Send {
    fn mark_roots(&self, marker: &mut Marker);
}

impl<F> RootSet for F
where
    F: Fn(&mut Marker) + Send,
{
    fn mark_roots(&self, marker: &mut Marker) {
        self(marker)
    }
}

/// Collects the atoms a [`RootSet`] reports.
#[derive(Default)]
pub struct Marker {
    atoms: Vec<Atom>,
}

impl Marker {
    pub fn new() -> Self {
        Self { atoms: vec![] }
    }

    pub fn mark(&mut self, atom: Atom) {
        self.atoms.push(atom);
    }

    /// Marks `word` if it is a tagged atom word and ignores it otherwise,
    /// which lets callers scan raw stacks of words conservatively. Returns
    /// whether the word was an atom.
    pub fn mark_word(&mut self, word: u64) -> bool {
        match Atom::from_word(word) {
            Some(atom) => {
                self.mark(atom);
                true
            }
            None => false,
        }
    }

    pub fn mark_words(&mut self, words: &[u64]) {
        for word in words {
            self.mark_word(*word);
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub(crate) fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    fn into_atoms(self) -> Vec<Atom> {
        self.atoms
    }
}

/// A cloneable, shared stack of atoms that can serve as a thread's roots.
#[derive(Clone, Default)]
pub struct RootStack {
    atoms: Arc<Mutex<Vec<Atom>>>,
}

impl RootStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, atom: Atom) {
        self.atoms.lock().unwrap().push(atom);
    }

    pub fn pop(&self) -> Option<Atom> {
        self.atoms.lock().unwrap().pop()
    }

    pub fn clear(&self) {
        self.atoms.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.atoms.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootSet for RootStack {
    fn mark_roots(&self, marker: &mut Marker) {
        for atom in self.atoms.lock().unwrap().iter() {
            marker.mark(*atom);
        }
    }
}

pub trait Collect {
    fn collect(&self) -> CollectOutcome;
    fn maybe_collect(&self) -> CollectOutcome;
    fn collection_requested(&self) -> bool;

    fn get_collections(&self) -> usize;
    fn get_collect_avg_time(&self) -> usize;
    fn get_state(&self) -> GcState;
}

struct MarkReport {
    mutator: u64,
    epoch: u64,
    atoms: Vec<Atom>,
}

/// Held while a term collection runs. Atom collections attempted in the
/// meantime are deferred.
pub struct TermGcGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

/// Runs atom collections.
///
/// A cycle marks every registered thread's roots before sweeping. Threads
/// are asked to report through an epoch number they poll at their safe
/// points; a thread that does not answer within the mark timeout makes the
/// cycle give up rather than wait forever.
pub struct Collector {
    atoms: Arc<AtomTable>,
    lock: Mutex<()>,

    // registered mutators and the threads they belong to
    mutators: Mutex<FxHashMap<u64, ThreadId>>,
    next_mutator: AtomicU64,
    epoch: AtomicU64,
    // zero outside of a mark phase
    active_epoch: AtomicU64,
    reports_tx: Sender<MarkReport>,
    reports_rx: Receiver<MarkReport>,

    state: AtomicU8,
    background: AtomicBool,
    collections: AtomicUsize,
    collected_total: AtomicUsize,
    collected_last: AtomicUsize,
    deferred: AtomicUsize,
    // times stored in milliseconds
    last_collect_time: AtomicUsize,
    collect_avg_time: AtomicUsize,

    // config vars
    mark_timeout: Duration,
}

impl Collect for Collector {
    fn collect(&self) -> CollectOutcome {
        self.run(None, false)
    }

    fn maybe_collect(&self) -> CollectOutcome {
        if !self.atoms.collection_requested() {
            return CollectOutcome::NotNeeded;
        }

        self.run(None, true)
    }

    fn collection_requested(&self) -> bool {
        self.atoms.collection_requested()
    }

    fn get_collections(&self) -> usize {
        self.collections.load(Ordering::SeqCst)
    }

    fn get_collect_avg_time(&self) -> usize {
        self.collect_avg_time.load(Ordering::SeqCst)
    }

    fn get_state(&self) -> GcState {
        match GcState::from_u8(self.state.load(Ordering::SeqCst)) {
            GcState::Idle if self.atoms.collection_requested() => GcState::Requested,
            state => state,
        }
    }
}

impl Collector {
    pub fn new(atoms: Arc<AtomTable>, mark_timeout: u64) -> Self {
        let (reports_tx, reports_rx) = unbounded();

        Self {
            atoms,
            lock: Mutex::new(()),
            mutators: Mutex::new(FxHashMap::default()),
            next_mutator: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            active_epoch: AtomicU64::new(0),
            reports_tx,
            reports_rx,
            state: AtomicU8::new(GcState::Idle as u8),
            background: AtomicBool::new(false),
            collections: AtomicUsize::new(0),
            collected_total: AtomicUsize::new(0),
            collected_last: AtomicUsize::new(0),
            deferred: AtomicUsize::new(0),
            last_collect_time: AtomicUsize::new(0),
            collect_avg_time: AtomicUsize::new(0),
            mark_timeout: Duration::from_millis(mark_timeout),
        }
    }

    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    /// Blocks until any running atom collection finishes, then keeps atom
    /// collections out until the guard is dropped.
    pub fn term_gc(&self) -> TermGcGuard<'_> {
        TermGcGuard {
            _lock: self.lock.lock().unwrap(),
        }
    }

    pub fn wait_for_collection(&self) {
        let _lock = self.lock.lock().unwrap();
    }

    pub fn get_collected_total(&self) -> usize {
        self.collected_total.load(Ordering::SeqCst)
    }

    pub fn get_collected_last(&self) -> usize {
        self.collected_last.load(Ordering::SeqCst)
    }

    pub fn get_deferred(&self) -> usize {
        self.deferred.load(Ordering::SeqCst)
    }

    pub fn get_last_collect_time(&self) -> usize {
        self.last_collect_time.load(Ordering::SeqCst)
    }

    pub fn mutator_count(&self) -> usize {
        self.mutators.lock().unwrap().len()
    }

    pub(crate) fn set_background(&self, on: bool) {
        self.background.store(on, Ordering::SeqCst);
    }

    pub(crate) fn runs_in_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    pub(crate) fn register_mutator(&self) -> u64 {
        let id = self.next_mutator.fetch_add(1, Ordering::SeqCst);

        self.mutators
            .lock()
            .unwrap()
            .insert(id, thread::current().id());

        id
    }

    // A thread leaving in the middle of a mark phase answers for itself so
    // the collector does not wait on it.
    pub(crate) fn deregister_mutator(&self, id: u64, last_epoch: u64) {
        self.mutators.lock().unwrap().remove(&id);

        let epoch = self.active_epoch.load(Ordering::SeqCst);

        if epoch != 0 && epoch != last_epoch {
            self.send_report(id, epoch, vec![]);
        }
    }

    pub(crate) fn marking_epoch(&self) -> u64 {
        self.active_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn report_roots(&self, id: u64, epoch: u64, roots: &dyn RootSet) {
        let mut marker = Marker::new();

        roots.mark_roots(&mut marker);
        self.send_report(id, epoch, marker.into_atoms());
    }

    pub(crate) fn collect_from(&self, id: u64, roots: &dyn RootSet, only_if_needed: bool) -> CollectOutcome {
        self.run(Some((id, roots)), only_if_needed)
    }

    fn send_report(&self, mutator: u64, epoch: u64, atoms: Vec<Atom>) {
        // the receiver lives as long as the collector
        let _ = self.reports_tx.send(MarkReport {
            mutator,
            epoch,
            atoms,
        });
    }

    fn run(&self, initiator: Option<(u64, &dyn RootSet)>, only_if_needed: bool) -> CollectOutcome {
        if !self.atoms.agc_enabled() {
            return CollectOutcome::NotNeeded;
        }

        // this thread's mutator could never answer, leave the cycle to its
        // next safe point
        if initiator.is_none() && self.is_mutator_thread() {
            self.deferred.fetch_add(1, Ordering::SeqCst);
            self.atoms.request_collection();

            warn!("atom collection started from an attached thread, deferred to its safe point");

            return CollectOutcome::Deferred;
        }

        let Ok(_lock) = self.lock.try_lock() else {
            self.deferred.fetch_add(1, Ordering::SeqCst);
            self.atoms.request_collection();

            debug!("atom collection deferred, collector busy");

            return CollectOutcome::Deferred;
        };

        self.atoms.clear_request();

        if only_if_needed && !self.atoms.should_collect() {
            return CollectOutcome::NotNeeded;
        }

        let start_time = Instant::now();

        if !self.mark(initiator, start_time + self.mark_timeout) {
            self.deferred.fetch_add(1, Ordering::SeqCst);
            self.atoms.postpone_collection();
            self.state.store(GcState::Idle as u8, Ordering::SeqCst);

            return CollectOutcome::Deferred;
        }

        self.state.store(GcState::Sweeping as u8, Ordering::SeqCst);

        let collected = self.atoms.sweep();

        self.collections.fetch_add(1, Ordering::SeqCst);
        self.collected_total.fetch_add(collected, Ordering::SeqCst);
        self.collected_last.store(collected, Ordering::SeqCst);

        // update collection time
        let elapsed_time = start_time.elapsed().as_millis() as usize;
        self.last_collect_time.store(elapsed_time, Ordering::SeqCst);
        self.update_collection_time(elapsed_time, self.get_collections());
        self.state.store(GcState::Idle as u8, Ordering::SeqCst);

        info!(
            collected,
            live = self.atoms.len(),
            elapsed_ms = elapsed_time,
            "atom collection finished"
        );

        CollectOutcome::Collected(collected)
    }

    // Returns false if some thread missed the deadline, in which case every
    // mark set so far has been cleared.
    fn mark(&self, initiator: Option<(u64, &dyn RootSet)>, deadline: Instant) -> bool {
        self.state.store(GcState::Marking as u8, Ordering::SeqCst);
        self.atoms.begin_marking();

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // must be visible before the snapshot, see deregister_mutator
        self.active_epoch.store(epoch, Ordering::SeqCst);

        let mut pending: FxHashSet<u64> = self.mutators.lock().unwrap().keys().copied().collect();

        debug!(epoch, threads = pending.len(), "atom marking started");

        if let Some((id, roots)) = initiator {
            let mut marker = Marker::new();

            pending.remove(&id);
            roots.mark_roots(&mut marker);
            self.atoms.apply_marks(marker.atoms());
        }

        while !pending.is_empty() {
            match self.reports_rx.recv_deadline(deadline) {
                Ok(report) if report.epoch == epoch => {
                    self.atoms.apply_marks(&report.atoms);
                    pending.remove(&report.mutator);
                }
                // left over from an abandoned cycle
                Ok(_) => continue,
                Err(_) => {
                    self.active_epoch.store(0, Ordering::SeqCst);
                    self.atoms.abort_marking();

                    warn!(
                        epoch,
                        missing = pending.len(),
                        "atom marking timed out, collection abandoned"
                    );

                    return false;
                }
            }
        }

        self.active_epoch.store(0, Ordering::SeqCst);

        true
    }

    fn is_mutator_thread(&self) -> bool {
        let current = thread::current().id();

        self.mutators
            .lock()
            .unwrap()
            .values()
            .any(|thread| *thread == current)
    }

    fn update_collection_time(&self, elapsed_time: usize, num_collections: usize) {
        let avg = self.collect_avg_time.load(Ordering::SeqCst);
        let update = elapsed_time.abs_diff(avg) / num_collections;

        if avg > elapsed_time {
            self.collect_avg_time.fetch_sub(update, Ordering::SeqCst);
        } else {
            self.collect_avg_time.fetch_add(update, Ordering::SeqCst);
        }
    }
}
