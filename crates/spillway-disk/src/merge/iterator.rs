//! Heap-driven merge iterator.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::vec;

use tracing::trace;

use super::{Comparator, MergeStats};
use crate::channel::reader::ChannelReader;
use crate::codec::RecordCodec;
use crate::io::registry::ChannelRegistry;
use crate::{Result, SpillError};

/// Position within one input run.
pub(crate) enum RunCursor<C: RecordCodec> {
    Memory(vec::IntoIter<C::Record>),
    Channel(ChannelReader<C>),
}

impl<C: RecordCodec> RunCursor<C> {
    fn next_record(&mut self) -> Result<Option<C::Record>> {
        match self {
            Self::Memory(records) => Ok(records.next()),
            Self::Channel(reader) => reader.next().transpose(),
        }
    }
}

/// Head record of one run.
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed: the smallest
/// record, and among equal records the lowest run index, compares greatest.
struct HeapEntry<R> {
    record: R,
    run: usize,
    comparator: Comparator<R>,
}

impl<R> PartialEq for HeapEntry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<R> Eq for HeapEntry<R> {}

impl<R> PartialOrd for HeapEntry<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for HeapEntry<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.comparator)(&other.record, &self.record).then_with(|| other.run.cmp(&self.run))
    }
}

/// Ordered stream over the runs of one merge.
///
/// Exhausted runs are closed and their channels deleted as soon as their
/// last record is taken. On the first error every reader is closed and
/// every channel of the registry is deleted; the iterator then yields
/// nothing further.
pub struct MergeIterator<C: RecordCodec> {
    cursors: Vec<Option<RunCursor<C>>>,
    heap: BinaryHeap<HeapEntry<C::Record>>,
    comparator: Comparator<C::Record>,
    registry: Arc<ChannelRegistry>,
    stats: MergeStats,
    failed: bool,
}

impl<C: RecordCodec> MergeIterator<C> {
    pub(crate) fn new(
        cursors: Vec<RunCursor<C>>,
        comparator: Comparator<C::Record>,
        registry: Arc<ChannelRegistry>,
        stats: MergeStats,
    ) -> Result<Self> {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(cursors.len()),
            cursors: cursors.into_iter().map(Some).collect(),
            comparator,
            registry,
            stats,
            failed: false,
        };
        if let Err(e) = iter.prime() {
            iter.fail();
            return Err(e);
        }
        Ok(iter)
    }

    /// Statistics of the merge that produced this iterator.
    pub const fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Runs that still have records.
    pub fn open_runs(&self) -> usize {
        self.cursors.iter().filter(|cursor| cursor.is_some()).count()
    }

    /// Stop early, closing every remaining run and deleting its channel.
    pub fn close(&mut self) {
        self.heap.clear();
        for run in 0..self.cursors.len() {
            self.retire(run);
        }
    }

    fn prime(&mut self) -> Result<()> {
        for run in 0..self.cursors.len() {
            let next = match self.cursors[run].as_mut() {
                Some(cursor) => cursor.next_record()?,
                None => continue,
            };
            match next {
                Some(record) => self.push(run, record),
                None => self.retire(run),
            }
        }
        Ok(())
    }

    fn push(&mut self, run: usize, record: C::Record) {
        self.heap.push(HeapEntry {
            record,
            run,
            comparator: Arc::clone(&self.comparator),
        });
    }

    fn advance(&mut self, run: usize, previous: &C::Record) -> Result<()> {
        let next = match self.cursors[run].as_mut() {
            Some(cursor) => cursor.next_record()?,
            None => return Ok(()),
        };
        match next {
            Some(record) => {
                if (self.comparator)(&record, previous) == Ordering::Less {
                    return Err(SpillError::ComparatorViolation(format!(
                        "run {run} yields a record ordered before its predecessor"
                    )));
                }
                self.push(run, record);
            }
            None => self.retire(run),
        }
        Ok(())
    }

    /// Empty the slot of `run`; channel runs are also closed and deleted.
    fn retire(&mut self, run: usize) {
        if let Some(RunCursor::Channel(mut reader)) = self.cursors[run].take() {
            reader.close();
            self.registry.discard(reader.metadata().channel());
            trace!("Run {run} exhausted");
        }
    }

    fn fail(&mut self) {
        self.failed = true;
        self.heap.clear();
        self.cursors.clear();
        self.registry.delete_all();
    }
}

impl<C: RecordCodec> Iterator for MergeIterator<C> {
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let entry = self.heap.pop()?;
        match self.advance(entry.run, &entry.record) {
            Ok(()) => Some(Ok(entry.record)),
            Err(e) => {
                self.fail();
                Some(Err(e))
            }
        }
    }
}

impl<C: RecordCodec> std::iter::FusedIterator for MergeIterator<C> {}

impl<C: RecordCodec> Drop for MergeIterator<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: RecordCodec> fmt::Debug for MergeIterator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeIterator")
            .field("open_runs", &self.open_runs())
            .field("stats", &self.stats)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}
