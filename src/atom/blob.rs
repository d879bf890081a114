use super::handle::Atom;
use crate::error::AtomError;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BlobFlags(u8);

impl BlobFlags {
    pub const NONE: BlobFlags = BlobFlags(0);
    /// Equal data always interns to the same atom.
    pub const UNIQUE: BlobFlags = BlobFlags(0x1);
    /// The data is text and can be read back as a string.
    pub const TEXT: BlobFlags = BlobFlags(0x2);
    /// The table keeps the caller's static bytes instead of a copy, and two
    /// values are only equal when they are the same bytes in memory.
    pub const NOCOPY: BlobFlags = BlobFlags(0x4);

    pub fn contains(self, other: BlobFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BlobFlags {
    type Output = BlobFlags;

    fn bitor(self, rhs: BlobFlags) -> BlobFlags {
        BlobFlags(self.0 | rhs.0)
    }
}

pub type AcquireHook = Arc<dyn Fn(Atom) + Send + Sync>;
pub type ReleaseHook = Arc<dyn Fn(Atom) -> bool + Send + Sync>;

/// Describes a kind of data that can be interned.
pub struct BlobType {
    name: String,
    flags: BlobFlags,
    acquire: Option<AcquireHook>,
    release: Option<ReleaseHook>,
}

impl fmt::Debug for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobType")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("acquire", &self.acquire.is_some())
            .field("release", &self.release.is_some())
            .finish()
    }
}

impl BlobType {
    pub fn new(name: impl Into<String>, flags: BlobFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            acquire: None,
            release: None,
        }
    }

    /// Called once for every new atom of this type, after the table lock is
    /// released.
    pub fn with_acquire<F>(mut self, hook: F) -> Self
    where
        F: Fn(Atom) + Send + Sync + 'static,
    {
        self.acquire = Some(Arc::new(hook));
        self
    }

    /// Called when the collector finds an atom of this type unreachable.
    /// Returning false keeps the atom alive until the next collection.
    ///
    /// The hook runs while the atom table is locked, so it must not intern
    /// or look up atoms.
    pub fn with_release<F>(mut self, hook: F) -> Self
    where
        F: Fn(Atom) -> bool + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> BlobFlags {
        self.flags
    }

    pub fn is_unique(&self) -> bool {
        self.flags.contains(BlobFlags::UNIQUE)
    }

    pub fn is_text(&self) -> bool {
        self.flags.contains(BlobFlags::TEXT)
    }

    pub fn is_nocopy(&self) -> bool {
        self.flags.contains(BlobFlags::NOCOPY)
    }

    pub(crate) fn acquire_hook(&self) -> Option<AcquireHook> {
        self.acquire.clone()
    }

    pub(crate) fn release_hook(&self) -> Option<ReleaseHook> {
        self.release.clone()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobId(u32);

impl BlobId {
    /// Byte strings.
    pub const TEXT: BlobId = BlobId(0);
    /// Wide strings, stored as little endian 32 bit code points.
    pub const UCS: BlobId = BlobId(1);
    /// Atoms whose type was unregistered while they were still alive.
    pub const DISCARDED: BlobId = BlobId(2);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

struct Registration {
    blob: Arc<BlobType>,
    registered: bool,
}

/// Append only list of every blob type ever registered.
pub struct BlobRegistry {
    types: Vec<Registration>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        let mut registry = Self { types: vec![] };
        let text_flags = BlobFlags::UNIQUE | BlobFlags::TEXT;

        registry.push(BlobType::new("text", text_flags).with_release(|_| true));
        registry.push(BlobType::new("ucs", text_flags).with_release(|_| true));
        registry.push(BlobType::new("<discarded>", BlobFlags::NONE).with_release(|_| true));

        registry
    }

    pub fn register(&mut self, blob: BlobType) -> Result<BlobId, AtomError> {
        if self.find(blob.name()).is_some() {
            return Err(AtomError::BlobExists(blob.name().to_string()));
        }

        Ok(self.push(blob))
    }

    pub fn find(&self, name: &str) -> Option<BlobId> {
        self.types
            .iter()
            .position(|r| r.registered && r.blob.name() == name)
            .map(|i| BlobId(i as u32))
    }

    /// Looks up any type an atom may still refer to, registered or not.
    pub fn get(&self, id: BlobId) -> Option<&Arc<BlobType>> {
        self.types.get(id.index()).map(|r| &r.blob)
    }

    pub fn is_registered(&self, id: BlobId) -> bool {
        self.types.get(id.index()).is_some_and(|r| r.registered)
    }

    pub fn unregister(&mut self, id: BlobId) -> Result<(), AtomError> {
        if id == BlobId::DISCARDED {
            return Err(AtomError::UnknownBlob);
        }

        match self.types.get_mut(id.index()) {
            Some(r) if r.registered => {
                r.registered = false;
                Ok(())
            }
            _ => Err(AtomError::UnknownBlob),
        }
    }

    pub fn registered(&self) -> impl Iterator<Item = (BlobId, &Arc<BlobType>)> {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, r)| r.registered)
            .map(|(i, r)| (BlobId(i as u32), &r.blob))
    }

    fn push(&mut self, blob: BlobType) -> BlobId {
        let id = BlobId(self.types.len() as u32);

        self.types.push(Registration {
            blob: Arc::new(blob),
            registered: true,
        });

        id
    }
}
