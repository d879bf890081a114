use super::collector::GcState;

/// A 'snapshot' of the runtime's heap and atom table.
///
/// Obtained by calling [`crate::Runtime::metrics`].
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Atoms currently in the table, builtins included.
    pub atoms: usize,

    /// Atoms below the builtin boundary, which are never collected.
    pub builtin_atoms: usize,

    /// Number of hash buckets in the atom table.
    pub atom_buckets: usize,

    /// Bytes of atom text and blob data held in the heap.
    pub atom_bytes: usize,

    /// Bytes handed out by the heap and not yet freed, rounded to size
    /// classes.
    pub bytes_in_use: usize,

    /// Bytes reserved from the system allocator in chunks.
    pub bytes_reserved: usize,

    /// Number of live chunks, carving and big.
    pub chunks: usize,

    /// Number of atom collections that ran to completion.
    pub collections: usize,

    /// Atoms destroyed by every collection so far.
    pub atoms_collected: usize,

    /// Atoms destroyed by the last collection.
    pub atoms_collected_last: usize,

    /// Collections that were deferred or abandoned while marking.
    pub deferred_collections: usize,

    /// Time the last collection took, in milliseconds.
    pub last_collect_time: usize,

    /// Average time a collection takes, in milliseconds.
    pub collect_avg_time: usize,

    /// Attached threads.
    pub mutators: usize,

    pub state: GcState,
    pub monitor_is_on: bool,
}
