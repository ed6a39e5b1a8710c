use std::{collections::btree_map::BTreeMap, fmt};

use kspin::SpinNoIrq;

use crate::{Access, HandleFlags, JobResult, KernelObject, ObjectKind, job_err};

/// An opaque per-process handle value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HandleValue(pub usize);

impl HandleValue {
    /// Never refers to an object.
    pub const NULL: Self = Self(0);
    /// Pseudo-handle for the calling process.
    pub const CURRENT_PROCESS: Self = Self(usize::MAX);
    /// Pseudo-handle for the calling process's main thread.
    pub const CURRENT_THREAD: Self = Self(usize::MAX - 1);

    const STEP: usize = 4;

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn is_pseudo(self) -> bool {
        self == Self::CURRENT_PROCESS || self == Self::CURRENT_THREAD
    }
}

impl fmt::Debug for HandleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// One slot of a [`HandleTable`].
#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub object: KernelObject,
    pub access: Access,
    pub flags: HandleFlags,
}

impl HandleEntry {
    pub fn new(object: impl Into<KernelObject>, access: Access, flags: HandleFlags) -> Self {
        Self {
            object: object.into(),
            access,
            flags,
        }
    }

    /// Fails with [`InvalidHandle`](crate::JobError::InvalidHandle) unless
    /// the entry refers to a `kind` object carrying all of `access`.
    pub(crate) fn require(&self, kind: ObjectKind, access: Access) -> JobResult<&KernelObject> {
        if self.object.kind() != kind || !self.access.contains(access) {
            return job_err!(
                InvalidHandle,
                "want {:?} with {:?}, got {:?} with {:?}",
                kind,
                access,
                self.object,
                self.access
            );
        }
        Ok(&self.object)
    }
}

/// The handle table of one process.
///
/// Entries are removed under the lock but dropped by the caller, so that
/// closing the last handle of a job never runs with the table locked.
pub struct HandleTable {
    entries: SpinNoIrq<BTreeMap<HandleValue, HandleEntry>>,
    capacity: usize,
}

impl HandleTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: SpinNoIrq::new(BTreeMap::new()),
            capacity,
        }
    }

    fn lowest_free(entries: &BTreeMap<HandleValue, HandleEntry>) -> HandleValue {
        let mut candidate = HandleValue::STEP;
        for value in entries.keys() {
            if value.0 != candidate {
                break;
            }
            candidate += HandleValue::STEP;
        }
        HandleValue(candidate)
    }

    /// Inserts `entry` at the lowest free value.
    pub fn insert(&self, entry: HandleEntry) -> JobResult<HandleValue> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return job_err!(InvalidParameter, "handle table full");
        }
        let value = Self::lowest_free(&entries);
        log::trace!("insert {:?} -> {:?}", value, entry.object);
        entries.insert(value, entry);
        Ok(value)
    }

    /// Inserts `entry` at a fixed value. Returns the entry back if the slot
    /// is taken.
    pub(crate) fn insert_at(
        &self,
        value: HandleValue,
        entry: HandleEntry,
    ) -> Result<(), HandleEntry> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&value) || entries.len() >= self.capacity {
            return Err(entry);
        }
        entries.insert(value, entry);
        Ok(())
    }

    /// Replaces the entry at `value`, returning the previous one.
    pub(crate) fn replace(&self, value: HandleValue, entry: HandleEntry) -> Option<HandleEntry> {
        self.entries.lock().insert(value, entry)
    }

    /// A copy of the entry at `value`.
    pub fn get(&self, value: HandleValue) -> JobResult<HandleEntry> {
        match self.entries.lock().get(&value) {
            Some(entry) => Ok(entry.clone()),
            None => job_err!(InvalidHandle, "no entry at {:?}", value),
        }
    }

    pub fn contains(&self, value: HandleValue) -> bool {
        self.entries.lock().contains_key(&value)
    }

    /// The flags of the entry at `value`.
    pub fn flags(&self, value: HandleValue) -> JobResult<HandleFlags> {
        match self.entries.lock().get(&value) {
            Some(entry) => Ok(entry.flags),
            None => job_err!(InvalidHandle, "no entry at {:?}", value),
        }
    }

    /// Replaces the flag bits selected by `mask` with those of `flags`.
    pub fn set_flags(
        &self,
        value: HandleValue,
        mask: HandleFlags,
        flags: HandleFlags,
    ) -> JobResult {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&value) else {
            return job_err!(InvalidHandle, "no entry at {:?}", value);
        };
        entry.flags = (entry.flags & !mask) | (flags & mask);
        Ok(())
    }

    /// Removes the entry at `value` unless it is protected from close.
    pub(crate) fn remove(&self, value: HandleValue) -> JobResult<HandleEntry> {
        let mut entries = self.entries.lock();
        match entries.get(&value) {
            None => job_err!(InvalidHandle, "no entry at {:?}", value),
            Some(entry) if entry.flags.contains(HandleFlags::PROTECT_FROM_CLOSE) => {
                job_err!(InvalidHandle, "{:?} is protected from close", value)
            }
            Some(_) => entries.remove(&value).map_or_else(|| job_err!(InvalidHandle), Ok),
        }
    }

    /// Entries to copy into a child, read at a single instant.
    ///
    /// Only `INHERIT` entries qualify, and those also marked
    /// `PROTECT_FROM_CLOSE` are left out. `only` restricts the copy to the
    /// listed values.
    pub(crate) fn inheritable(
        &self,
        only: Option<&[HandleValue]>,
    ) -> Vec<(HandleValue, HandleEntry)> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(value, _)| only.is_none_or(|only| only.contains(value)))
            .filter(|(_, entry)| {
                entry.flags.contains(HandleFlags::INHERIT)
                    && !entry.flags.contains(HandleFlags::PROTECT_FROM_CLOSE)
            })
            .map(|(value, entry)| (*value, entry.clone()))
            .collect()
    }

    /// Empties the table, handing every entry to the caller.
    pub(crate) fn take_all(&self) -> Vec<HandleEntry> {
        let entries = core::mem::take(&mut *self.entries.lock());
        entries.into_values().collect()
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open handle values, in ascending order.
    pub fn values(&self) -> Vec<HandleValue> {
        self.entries.lock().keys().copied().collect()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.lock().iter()).finish()
    }
}
