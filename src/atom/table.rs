use super::blob::{BlobId, BlobRegistry, BlobType, ReleaseHook};
use super::handle::{Atom, GENERATION_MASK};
use super::hash::{bucket_index, hash_bytes};
use crate::config::Config;
use crate::error::{AtomError, ConfigError};
use crate::pool::{Heap, LocalPool};
use std::collections::BTreeSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

enum Payload {
    Empty,
    Pooled { ptr: NonNull<u8>, len: usize },
    Static(&'static [u8]),
}

unsafe impl Send for Payload {}

impl Payload {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Empty => &[],
            Payload::Pooled { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
            Payload::Static(bytes) => bytes,
        }
    }

    // NOCOPY data is equal only to the very same bytes
    fn same_address(&self, bytes: &[u8]) -> bool {
        match self {
            Payload::Static(own) => own.as_ptr() == bytes.as_ptr() && own.len() == bytes.len(),
            _ => false,
        }
    }
}

struct AtomEntry {
    payload: Payload,
    blob: BlobId,
    hash: u64,
    next: Option<u32>,
    refs: u32,
    marked: bool,
}

struct Slot {
    generation: u32,
    entry: Option<AtomEntry>,
}

struct TableState {
    buckets: Vec<Option<u32>>,
    slots: Vec<Slot>,
    // empty slots above the builtin boundary, lowest reused first
    holes: BTreeSet<u32>,
    count: usize,
    builtin: usize,
    non_garbage: usize,
    bytes: usize,
    // set for the duration of a mark phase, every atom touched is marked
    marking: bool,
    blobs: BlobRegistry,
    fallback_release: Option<ReleaseHook>,
    pool: LocalPool,
}

impl Drop for TableState {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(AtomEntry {
                payload: Payload::Pooled { ptr, len },
                ..
            }) = slot.entry.take()
            {
                unsafe { self.pool.free(ptr, len) };
            }
        }
    }
}

impl TableState {
    fn atom_at(&self, index: u32) -> Atom {
        Atom::new(index, self.slots[index as usize].generation)
    }

    fn live(&self, atom: Atom) -> Result<&AtomEntry, AtomError> {
        let slot = self.slots.get(atom.index()).ok_or(AtomError::UnknownAtom)?;

        if slot.generation != atom.generation() {
            return Err(AtomError::Stale);
        }

        slot.entry.as_ref().ok_or(AtomError::Stale)
    }

    fn live_mut(&mut self, atom: Atom) -> Result<&mut AtomEntry, AtomError> {
        let slot = self
            .slots
            .get_mut(atom.index())
            .ok_or(AtomError::UnknownAtom)?;

        if slot.generation != atom.generation() {
            return Err(AtomError::Stale);
        }

        slot.entry.as_mut().ok_or(AtomError::Stale)
    }

    fn find(&self, hash: u64, bytes: &[u8], blob: BlobId, nocopy: bool) -> Option<u32> {
        let mut cursor = self.buckets[bucket_index(hash, self.buckets.len())];

        while let Some(index) = cursor {
            let entry = self.slots[index as usize].entry.as_ref()?;

            if entry.hash == hash && entry.blob == blob {
                let equal = if nocopy {
                    entry.payload.same_address(bytes)
                } else {
                    entry.payload.as_bytes() == bytes
                };

                if equal {
                    return Some(index);
                }
            }

            cursor = entry.next;
        }

        None
    }

    // another reference to an existing atom was handed out
    fn reuse(&mut self, index: u32) {
        let builtin = index < self.builtin as u32;
        let marking = self.marking;

        if let Some(entry) = self.slots[index as usize].entry.as_mut() {
            if !builtin {
                entry.refs = entry.refs.saturating_add(1);
            }

            if marking {
                entry.marked = true;
            }
        }
    }

    fn copy_bytes(&mut self, bytes: &[u8]) -> Result<Payload, AtomError> {
        if bytes.is_empty() {
            return Ok(Payload::Empty);
        }

        let ptr = self.pool.alloc(bytes.len())?;

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        self.bytes += bytes.len();

        Ok(Payload::Pooled {
            ptr,
            len: bytes.len(),
        })
    }

    fn insert(&mut self, payload: Payload, blob: BlobId, hash: u64, reuse_holes: bool) -> Atom {
        let hole = if reuse_holes {
            self.holes.pop_first()
        } else {
            None
        };
        let index = match hole {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });

                (self.slots.len() - 1) as u32
            }
        };
        let bucket = bucket_index(hash, self.buckets.len());

        self.slots[index as usize].entry = Some(AtomEntry {
            payload,
            blob,
            hash,
            next: self.buckets[bucket],
            refs: 1,
            marked: self.marking,
        });
        self.buckets[bucket] = Some(index);
        self.count += 1;

        if self.count > 2 * self.buckets.len() {
            self.grow();
        }

        self.atom_at(index)
    }

    // relinks every chain into twice as many buckets, atoms stay where they are
    fn grow(&mut self) {
        let buckets = self.buckets.len() * 2;
        let mut new_buckets = vec![None; buckets];

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.as_mut() {
                let bucket = bucket_index(entry.hash, buckets);

                entry.next = new_buckets[bucket];
                new_buckets[bucket] = Some(index as u32);
            }
        }

        self.buckets = new_buckets;

        debug!(buckets, atoms = self.count, "atom table grew");
    }

    fn unlink(&mut self, index: u32) {
        let (hash, next) = match self.slots[index as usize].entry.as_ref() {
            Some(entry) => (entry.hash, entry.next),
            None => return,
        };
        let bucket = bucket_index(hash, self.buckets.len());

        if self.buckets[bucket] == Some(index) {
            self.buckets[bucket] = next;
            return;
        }

        let mut cursor = self.buckets[bucket];

        while let Some(i) = cursor {
            let Some(entry) = self.slots[i as usize].entry.as_mut() else {
                break;
            };

            if entry.next == Some(index) {
                entry.next = next;
                return;
            }

            cursor = entry.next;
        }

        debug_assert!(false, "atom {index} missing from its hash chain");
    }

    fn destroy(&mut self, index: u32) {
        self.unlink(index);

        let slot = &mut self.slots[index as usize];
        let Some(entry) = slot.entry.take() else {
            return;
        };

        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;

        if let Payload::Pooled { ptr, len } = entry.payload {
            unsafe { self.pool.free(ptr, len) };
            self.bytes -= len;
        }

        self.holes.insert(index);
        self.count -= 1;
    }
}

/// Maps byte strings and typed blobs to atoms.
///
/// Interning is linearized by a single lock, so two threads interning equal
/// data under a unique blob type always agree on one atom. The bytes of
/// every atom live in the heap the table was built with.
pub struct AtomTable {
    state: Mutex<TableState>,
    requested: AtomicBool,
    agc_enabled: bool,
    margin: usize,
}

impl AtomTable {
    pub fn new(heap: &Arc<Heap>, config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::build(heap, config))
    }

    // `config` must already be validated
    pub(crate) fn build(heap: &Arc<Heap>, config: &Config) -> Self {
        let state = TableState {
            buckets: vec![None; config.atom_buckets],
            slots: vec![],
            holes: BTreeSet::new(),
            count: 0,
            builtin: 0,
            non_garbage: 0,
            bytes: 0,
            marking: false,
            blobs: BlobRegistry::new(),
            fallback_release: None,
            pool: heap.local_pool(),
        };

        Self {
            state: Mutex::new(state),
            requested: AtomicBool::new(false),
            agc_enabled: config.agc_enabled,
            margin: config.agc_margin,
        }
    }

    /// Interns `bytes` as a value of the blob type `blob`. Returns the atom
    /// and whether it was created by this call. Either way the caller owns
    /// one reference to the atom, dropped with [`AtomTable::unregister_atom`].
    pub fn intern(&self, bytes: &[u8], blob: BlobId) -> Result<(Atom, bool), AtomError> {
        self.intern_payload(bytes, None, blob)
    }

    /// Like [`AtomTable::intern`], but NOCOPY types keep a reference to
    /// `bytes` instead of copying them.
    pub fn intern_static(
        &self,
        bytes: &'static [u8],
        blob: BlobId,
    ) -> Result<(Atom, bool), AtomError> {
        self.intern_payload(bytes, Some(bytes), blob)
    }

    pub fn intern_str(&self, text: &str) -> Result<Atom, AtomError> {
        self.intern(text.as_bytes(), BlobId::TEXT).map(|(atom, _)| atom)
    }

    pub fn intern_wide(&self, text: &str) -> Result<Atom, AtomError> {
        let bytes: Vec<u8> = text
            .chars()
            .flat_map(|c| (c as u32).to_le_bytes())
            .collect();

        self.intern(&bytes, BlobId::UCS).map(|(atom, _)| atom)
    }

    /// Finds the atom for `bytes` without creating one or taking a reference.
    pub fn lookup(&self, bytes: &[u8], blob: BlobId) -> Option<Atom> {
        let hash = hash_bytes(bytes);
        let mut state = self.lock();
        let nocopy = state.blobs.get(blob)?.is_nocopy();
        let index = state.find(hash, bytes, blob, nocopy)?;

        if state.marking {
            if let Some(entry) = state.slots[index as usize].entry.as_mut() {
                entry.marked = true;
            }
        }

        Some(state.atom_at(index))
    }

    pub fn lookup_text(&self, atom: Atom) -> Result<Vec<u8>, AtomError> {
        self.with_text(atom, |bytes| bytes.to_vec())
    }

    /// Runs `f` on the atom's bytes while the table is locked. `f` must not
    /// call back into the table.
    pub fn with_text<F, O>(&self, atom: Atom, f: F) -> Result<O, AtomError>
    where
        F: FnOnce(&[u8]) -> O,
    {
        let state = self.lock();
        let entry = state.live(atom)?;

        Ok(f(entry.payload.as_bytes()))
    }

    /// Reads a text atom back as a string, decoding wide atoms.
    pub fn lookup_str(&self, atom: Atom) -> Result<String, AtomError> {
        let state = self.lock();
        let entry = state.live(atom)?;
        let bytes = entry.payload.as_bytes();

        if entry.blob == BlobId::UCS {
            Ok(bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .map(|c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect())
        } else {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    pub fn blob_of(&self, atom: Atom) -> Result<BlobId, AtomError> {
        Ok(self.lock().live(atom)?.blob)
    }

    pub fn is_live(&self, atom: Atom) -> bool {
        self.lock().live(atom).is_ok()
    }

    pub fn refcount(&self, atom: Atom) -> Result<u32, AtomError> {
        Ok(self.lock().live(atom)?.refs)
    }

    /// Takes a reference on behalf of foreign code. Builtin atoms are not
    /// counted.
    pub fn register_atom(&self, atom: Atom) -> Result<(), AtomError> {
        let mut state = self.lock();
        let builtin = atom.index() < state.builtin;
        let entry = state.live_mut(atom)?;

        if !builtin {
            entry.refs = entry.refs.saturating_add(1);
        }

        Ok(())
    }

    pub fn unregister_atom(&self, atom: Atom) -> Result<(), AtomError> {
        let mut state = self.lock();
        let builtin = atom.index() < state.builtin;
        let marking = state.marking;
        let entry = state.live_mut(atom)?;

        if builtin {
            return Ok(());
        }

        if entry.refs == 0 {
            warn!(index = atom.index(), "unregistered an atom with no references");
            return Err(AtomError::Underflow);
        }

        entry.refs -= 1;

        // the caller may still hold it on a stack that was already scanned
        if marking && entry.refs == 0 {
            entry.marked = true;
        }

        Ok(())
    }

    pub fn register_blob_type(&self, blob: BlobType) -> Result<BlobId, AtomError> {
        let id = self.lock().blobs.register(blob)?;

        debug!(id = id.index(), "registered blob type");

        Ok(id)
    }

    pub fn find_blob_type(&self, name: &str) -> Option<BlobId> {
        self.lock().blobs.find(name)
    }

    pub fn blob_type(&self, id: BlobId) -> Option<Arc<BlobType>> {
        self.lock().blobs.get(id).cloned()
    }

    pub fn blob_type_names(&self) -> Vec<(BlobId, String)> {
        self.lock()
            .blobs
            .registered()
            .map(|(id, blob)| (id, blob.name().to_string()))
            .collect()
    }

    /// Withdraws a blob type. Its live atoms are relabeled as discarded
    /// rather than destroyed, since their handles may still be held.
    pub fn unregister_blob_type(&self, id: BlobId) -> Result<(), AtomError> {
        let mut state = self.lock();
        let mut relabeled = 0;

        state.blobs.unregister(id)?;

        for slot in state.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                if entry.blob == id {
                    entry.blob = BlobId::DISCARDED;
                    relabeled += 1;
                }
            }
        }

        debug!(id = id.index(), relabeled, "unregistered blob type");

        Ok(())
    }

    /// Used for atoms whose blob type has no release hook of its own.
    pub fn set_fallback_release<F>(&self, hook: F)
    where
        F: Fn(Atom) -> bool + Send + Sync + 'static,
    {
        self.lock().fallback_release = Some(Arc::new(hook));
    }

    /// Every atom that exists now becomes a builtin and is never collected.
    pub fn lock_atoms(&self) {
        let mut state = self.lock();
        let builtin = state.slots.len();

        state.builtin = builtin;
        state.non_garbage = state.count;
        state.holes = state.holes.split_off(&(builtin as u32));
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn builtin_count(&self) -> usize {
        self.lock().builtin
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().buckets.len()
    }

    /// Bytes of atom data held in the heap.
    pub fn bytes_used(&self) -> usize {
        self.lock().bytes
    }

    pub fn non_garbage(&self) -> usize {
        self.lock().non_garbage
    }

    pub fn agc_enabled(&self) -> bool {
        self.agc_enabled
    }

    /// Asks for a collection. Returns false if one was already pending.
    pub fn request_collection(&self) -> bool {
        if !self.agc_enabled {
            return false;
        }

        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn collection_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Whether enough atoms were created since the last collection to make
    /// another one worthwhile.
    pub fn should_collect(&self) -> bool {
        if !self.agc_enabled {
            return false;
        }

        let state = self.lock();

        state.count > state.non_garbage + self.margin
    }

    pub(crate) fn clear_request(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    // The next request waits for another margin of new atoms.
    pub(crate) fn postpone_collection(&self) {
        let mut state = self.lock();

        state.non_garbage = state.count;
    }

    pub(crate) fn begin_marking(&self) {
        self.lock().marking = true;
    }

    pub(crate) fn apply_marks(&self, atoms: &[Atom]) {
        let mut state = self.lock();
        let builtin = state.builtin;

        for atom in atoms {
            if atom.index() < builtin {
                continue;
            }

            if let Ok(entry) = state.live_mut(*atom) {
                entry.marked = true;
            }
        }
    }

    pub(crate) fn abort_marking(&self) {
        let mut state = self.lock();

        state.marking = false;

        for slot in state.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                entry.marked = false;
            }
        }
    }

    /// Destroys every atom above the builtin boundary that is neither
    /// referenced nor marked and whose release hook agrees. Returns how
    /// many were destroyed.
    pub(crate) fn sweep(&self) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut collected = 0;

        for index in state.builtin..state.slots.len() {
            let blob = match state.slots[index].entry.as_mut() {
                Some(entry) if entry.refs == 0 && !entry.marked => entry.blob,
                Some(entry) => {
                    entry.marked = false;
                    continue;
                }
                None => continue,
            };

            let hook = state
                .blobs
                .get(blob)
                .and_then(|blob| blob.release_hook())
                .or_else(|| state.fallback_release.clone());
            let atom = state.atom_at(index as u32);
            let release = match hook {
                Some(hook) => hook(atom),
                None => false,
            };

            if release {
                state.destroy(index as u32);
                collected += 1;
            }
        }

        state.marking = false;
        state.non_garbage = state.count;

        collected
    }

    fn intern_payload(
        &self,
        bytes: &[u8],
        static_bytes: Option<&'static [u8]>,
        blob: BlobId,
    ) -> Result<(Atom, bool), AtomError> {
        let hash = hash_bytes(bytes);
        let mut state = self.lock();

        if !state.blobs.is_registered(blob) {
            return Err(AtomError::UnknownBlob);
        }

        let blob_type = state.blobs.get(blob).cloned().ok_or(AtomError::UnknownBlob)?;
        let nocopy = blob_type.is_nocopy();

        if blob_type.is_unique() {
            if let Some(index) = state.find(hash, bytes, blob, nocopy) {
                state.reuse(index);

                return Ok((state.atom_at(index), false));
            }
        }

        let payload = match (nocopy, static_bytes) {
            (true, Some(bytes)) => Payload::Static(bytes),
            (true, None) => return Err(AtomError::NoCopyNotStatic(blob_type.name().to_string())),
            (false, _) => state.copy_bytes(bytes)?,
        };
        let atom = state.insert(payload, blob, hash, self.agc_enabled);
        let wants_collection = self.agc_enabled && state.count > state.non_garbage + self.margin;

        drop(state);

        if let Some(acquire) = blob_type.acquire_hook() {
            acquire(atom);
        }

        if wants_collection && self.request_collection() {
            debug!("atom collection requested");
        }

        Ok((atom, true))
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::BlobFlags;
    use crate::pool::SizeClass;
    use std::sync::atomic::AtomicUsize;

    fn table_with(config: Config) -> (Arc<Heap>, AtomTable) {
        let heap = Arc::new(Heap::new(&config).unwrap());
        let table = AtomTable::new(&heap, &config).unwrap();

        (heap, table)
    }

    fn table() -> (Arc<Heap>, AtomTable) {
        table_with(Config::default())
    }

    #[test]
    fn interning_twice_returns_same_atom() {
        let (_heap, table) = table();
        let (a, new_a) = table.intern(b"hello", BlobId::TEXT).unwrap();
        let (b, new_b) = table.intern(b"hello", BlobId::TEXT).unwrap();

        assert_eq!(a, b);
        assert!(new_a);
        assert!(!new_b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.refcount(a), Ok(2));
    }

    #[test]
    fn text_round_trip() {
        let (_heap, table) = table();
        let atom = table.intern_str("foo_bar").unwrap();

        assert_eq!(table.lookup_text(atom).unwrap(), b"foo_bar");
        assert_eq!(table.lookup_str(atom).unwrap(), "foo_bar");
    }

    #[test]
    fn empty_text_is_an_atom() {
        let (heap, table) = table();
        let atom = table.intern_str("").unwrap();

        assert_eq!(table.lookup_text(atom).unwrap(), b"");
        assert_eq!(table.intern_str("").unwrap(), atom);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn wide_text_round_trip() {
        let (_heap, table) = table();
        let wide = table.intern_wide("λx→y").unwrap();
        let narrow = table.intern_str("λx→y").unwrap();

        assert_ne!(wide, narrow);
        assert_eq!(table.blob_of(wide), Ok(BlobId::UCS));
        assert_eq!(table.lookup_str(wide).unwrap(), "λx→y");
        assert_eq!(table.lookup_text(wide).unwrap().len(), 4 * 4);
    }

    #[test]
    fn same_bytes_different_types_are_different_atoms() {
        let (_heap, table) = table();
        let id = table
            .register_blob_type(BlobType::new("reserved", BlobFlags::UNIQUE))
            .unwrap();
        let (a, _) = table.intern(b"x", BlobId::TEXT).unwrap();
        let (b, _) = table.intern(b"x", id).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn non_unique_types_always_create() {
        let (_heap, table) = table();
        let id = table
            .register_blob_type(BlobType::new("record", BlobFlags::NONE))
            .unwrap();
        let (a, new_a) = table.intern(b"same", id).unwrap();
        let (b, new_b) = table.intern(b"same", id).unwrap();

        assert_ne!(a, b);
        assert!(new_a && new_b);
    }

    #[test]
    fn nocopy_compares_by_address() {
        static FIRST: [u8; 3] = *b"abc";
        static SECOND: [u8; 3] = *b"abc";

        let (heap, table) = table();
        let id = table
            .register_blob_type(BlobType::new("handle", BlobFlags::UNIQUE | BlobFlags::NOCOPY))
            .unwrap();
        let (a, _) = table.intern_static(&FIRST, id).unwrap();
        let (b, b_new) = table.intern_static(&FIRST, id).unwrap();
        let (c, _) = table.intern_static(&SECOND, id).unwrap();

        assert_eq!(a, b);
        assert!(!b_new);
        assert_ne!(a, c);
        assert_eq!(heap.bytes_in_use(), 0);
        assert_eq!(
            table.intern(b"abc", id),
            Err(AtomError::NoCopyNotStatic("handle".to_string()))
        );
    }

    #[test]
    fn lookup_does_not_create() {
        let (_heap, table) = table();

        assert_eq!(table.lookup(b"missing", BlobId::TEXT), None);

        let atom = table.intern_str("present").unwrap();

        assert_eq!(table.lookup(b"present", BlobId::TEXT), Some(atom));
        assert_eq!(table.refcount(atom), Ok(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn table_grows_and_keeps_every_atom() {
        let config = Config {
            atom_buckets: 4,
            ..Config::default()
        };
        let (_heap, table) = table_with(config);
        let atoms: Vec<_> = (0..1000)
            .map(|i| table.intern_str(&format!("atom{i}")).unwrap())
            .collect();

        assert!(table.bucket_count() >= 500);

        for (i, atom) in atoms.iter().enumerate() {
            assert_eq!(table.lookup(format!("atom{i}").as_bytes(), BlobId::TEXT), Some(*atom));
            assert_eq!(table.lookup_str(*atom).unwrap(), format!("atom{i}"));
        }
    }

    #[test]
    fn refcounting() {
        let (_heap, table) = table();
        let atom = table.intern_str("counted").unwrap();

        table.register_atom(atom).unwrap();
        assert_eq!(table.refcount(atom), Ok(2));

        table.unregister_atom(atom).unwrap();
        table.unregister_atom(atom).unwrap();
        assert_eq!(table.refcount(atom), Ok(0));

        assert_eq!(table.unregister_atom(atom), Err(AtomError::Underflow));
    }

    #[test]
    fn builtins_are_not_counted() {
        let (_heap, table) = table();
        let atom = table.intern_str("true").unwrap();

        table.lock_atoms();
        table.register_atom(atom).unwrap();
        table.intern_str("true").unwrap();

        assert_eq!(table.builtin_count(), 1);
        assert_eq!(table.refcount(atom), Ok(1));
    }

    #[test]
    fn sweep_destroys_unreferenced_atoms() {
        let (heap, table) = table();
        let keep = table.intern_str("keep").unwrap();
        let drop = table.intern_str("drop").unwrap();

        table.unregister_atom(drop).unwrap();

        assert_eq!(table.sweep(), 1);
        assert!(table.is_live(keep));
        assert_eq!(table.lookup_text(drop), Err(AtomError::Stale));
        assert_eq!(table.lookup(b"drop", BlobId::TEXT), None);
        assert_eq!(heap.bytes_in_use(), SizeClass::round(4).unwrap());
    }

    #[test]
    fn marked_atoms_survive_one_sweep() {
        let (_heap, table) = table();
        let atom = table.intern_str("rooted").unwrap();

        table.unregister_atom(atom).unwrap();
        table.begin_marking();
        table.apply_marks(&[atom]);

        assert_eq!(table.sweep(), 0);
        assert!(table.is_live(atom));

        // the mark does not carry over to the next cycle
        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn atoms_created_while_marking_are_kept() {
        let (_heap, table) = table();

        table.begin_marking();

        let atom = table.intern_str("young").unwrap();
        table.unregister_atom(atom).unwrap();

        assert_eq!(table.sweep(), 0);
        assert!(table.is_live(atom));
    }

    #[test]
    fn aborted_marks_are_cleared() {
        let (_heap, table) = table();
        let atom = table.intern_str("maybe").unwrap();

        table.unregister_atom(atom).unwrap();
        table.begin_marking();
        table.apply_marks(&[atom]);
        table.abort_marking();

        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn collected_slots_are_reused_lowest_first() {
        let (_heap, table) = table();
        let atoms: Vec<_> = (0..10)
            .map(|i| table.intern_str(&format!("a{i}")).unwrap())
            .collect();

        table.register_atom(atoms[0]).unwrap();
        for atom in atoms.iter() {
            table.unregister_atom(*atom).unwrap();
        }

        assert_eq!(table.sweep(), 9);

        let reused = table.intern_str("fresh").unwrap();

        assert_eq!(reused.index(), atoms[1].index());
        assert_ne!(reused, atoms[1]);
        assert_eq!(table.lookup_text(atoms[1]), Err(AtomError::Stale));
    }

    #[test]
    fn slots_are_not_reused_without_agc() {
        let config = Config {
            agc_enabled: false,
            ..Config::default()
        };
        let (_heap, table) = table_with(config);

        table.intern_str("a").unwrap();

        assert!(!table.request_collection());
        assert!(!table.should_collect());
    }

    #[test]
    fn release_hook_can_decline() {
        let (_heap, table) = table();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = table
            .register_blob_type(
                BlobType::new("stubborn", BlobFlags::UNIQUE).with_release(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst) > 0
                }),
            )
            .unwrap();
        let (atom, _) = table.intern(b"s", id).unwrap();

        table.unregister_atom(atom).unwrap();

        assert_eq!(table.sweep(), 0);
        assert!(table.is_live(atom));
        assert_eq!(table.sweep(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn types_without_release_use_the_fallback() {
        let (_heap, table) = table();
        let id = table
            .register_blob_type(BlobType::new("plain", BlobFlags::UNIQUE))
            .unwrap();
        let (atom, _) = table.intern(b"p", id).unwrap();

        table.unregister_atom(atom).unwrap();

        // no hook anywhere, nobody may decide to release it
        assert_eq!(table.sweep(), 0);
        assert!(table.is_live(atom));

        table.set_fallback_release(|_| true);
        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn acquire_hook_sees_new_atoms_only() {
        let (_heap, table) = table();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = table
            .register_blob_type(BlobType::new("tracked", BlobFlags::UNIQUE).with_acquire(
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
            ))
            .unwrap();

        table.intern(b"t", id).unwrap();
        table.intern(b"t", id).unwrap();
        table.intern(b"u", id).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistering_a_type_discards_its_atoms() {
        let (_heap, table) = table();
        let id = table
            .register_blob_type(BlobType::new("foreign", BlobFlags::UNIQUE))
            .unwrap();
        let (atom, _) = table.intern(b"f", id).unwrap();

        table.unregister_blob_type(id).unwrap();

        assert_eq!(table.blob_of(atom), Ok(BlobId::DISCARDED));
        assert_eq!(table.find_blob_type("foreign"), None);
        assert_eq!(table.intern(b"f", id), Err(AtomError::UnknownBlob));
        assert_eq!(table.lookup_text(atom).unwrap(), b"f");
    }

    #[test]
    fn passing_the_margin_requests_collection() {
        let config = Config {
            agc_margin: 10,
            ..Config::default()
        };
        let (_heap, table) = table_with(config);

        for i in 0..10 {
            table.intern_str(&format!("{i}")).unwrap();
        }
        assert!(!table.collection_requested());

        table.intern_str("one too many").unwrap();
        assert!(table.collection_requested());
        assert!(table.should_collect());

        // requests are coalesced
        assert!(!table.request_collection());
    }

    #[test]
    fn postponed_collection_waits_another_margin() {
        let config = Config {
            agc_margin: 10,
            ..Config::default()
        };
        let (_heap, table) = table_with(config);

        for i in 0..11 {
            table.intern_str(&format!("{i}")).unwrap();
        }
        assert!(table.should_collect());

        table.clear_request();
        table.postpone_collection();

        for i in 11..21 {
            table.intern_str(&format!("{i}")).unwrap();
        }
        assert!(!table.should_collect());
        assert!(!table.collection_requested());

        table.intern_str("21").unwrap();
        assert!(table.collection_requested());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let heap = Arc::new(Heap::new(&Config::default()).unwrap());
        let config = Config {
            atom_buckets: 3,
            ..Config::default()
        };

        assert!(matches!(AtomTable::new(&heap, &config), Err(ConfigError::Buckets)));
    }

    #[test]
    fn dropping_the_table_frees_its_bytes() {
        let (heap, table) = table();

        for i in 0..100 {
            table.intern_str(&format!("some longer atom text {i}")).unwrap();
        }
        assert!(heap.bytes_in_use() > 0);

        drop(table);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn stale_and_unknown_handles() {
        let (_heap, table) = table();

        assert_eq!(table.lookup_text(Atom::new(42, 0)), Err(AtomError::UnknownAtom));

        let atom = table.intern_str("x").unwrap();
        let forged = Atom::new(atom.index() as u32, atom.generation() + 1);

        assert_eq!(table.register_atom(forged), Err(AtomError::Stale));
    }
}
