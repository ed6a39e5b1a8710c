use std::collections::VecDeque;

use crate::{Pid, ProcessState};

/// One process as seen by a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: Pid,
    pub parent_pid: Option<Pid>,
    pub image: String,
    pub thread_count: usize,
    pub state: ProcessState,
}

/// A point-in-time listing of the process records of a
/// [`Registry`](crate::Registry), in pid order.
///
/// Consuming the snapshot does not refresh it; take a new one for fresh
/// data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: VecDeque<ProcessEntry>,
}

impl Snapshot {
    pub(crate) fn new(entries: impl IntoIterator<Item = ProcessEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl Iterator for Snapshot {
    type Item = ProcessEntry;

    fn next(&mut self) -> Option<ProcessEntry> {
        self.entries.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.entries.len(), Some(self.entries.len()))
    }
}

impl ExactSizeIterator for Snapshot {}
