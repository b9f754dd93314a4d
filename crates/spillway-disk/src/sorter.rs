//! External sorter: buffers records, spills sorted runs and merges them.

use std::fmt;
use std::sync::Arc;
use std::vec;

use tracing::{debug, info};

use crate::cancel::{CancellationFlag, MergeSlot, MergeSlots};
use crate::channel::ChannelWithMeta;
use crate::channel::writer::ChannelWriter;
use crate::codec::RecordCodec;
use crate::config::SpillConfig;
use crate::io::ChannelProvider;
use crate::io::registry::ChannelRegistry;
use crate::merge::iterator::MergeIterator;
use crate::merge::{Comparator, MergeEngine, MergeStats, Run};
use crate::{Result, SpillError};

/// Lifecycle of an [`ExternalSorter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SorterState {
    /// Accepting records.
    Filling,
    /// Sorting the buffer for a spill or for the final result.
    Sorting,
    /// Finished with at least one spilled run; output is merged.
    Spilled,
    /// Finished without spilling; output comes straight from memory.
    ReadyInMemory,
    /// A failure occurred and every channel was deleted.
    Failed,
}

/// Statistics of one sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Records added.
    pub records: u64,
    /// Sorted runs spilled to disk.
    pub spills: usize,
    /// Bytes written by spills.
    pub spilled_bytes: u64,
    /// Work done by the final merge.
    pub merge: MergeStats,
}

/// Sorts an arbitrarily large record stream within a memory threshold.
///
/// Records are buffered until their estimated size reaches the configured
/// threshold; the next record then stable-sorts and spills the buffer into a
/// new channel, so the last run always stays in memory.
/// [`finish`](Self::finish) returns the buffer directly if nothing was
/// spilled, and otherwise merges every spilled run with the final buffer.
/// With a fan-in of 2 at most two channels are kept: further spills are
/// merged into the newest one. Any failure deletes every channel the sorter
/// created.
pub struct ExternalSorter<C: RecordCodec> {
    config: SpillConfig,
    registry: Arc<ChannelRegistry>,
    codec: Arc<C>,
    comparator: Comparator<C::Record>,
    cancel: CancellationFlag,
    merge_slots: Option<Arc<MergeSlots>>,
    buffer: Vec<C::Record>,
    buffered_bytes: usize,
    spilled: Vec<ChannelWithMeta>,
    state: SorterState,
    stats: SortStats,
}

impl<C: RecordCodec> ExternalSorter<C> {
    /// Create a sorter spilling through `provider`.
    pub fn new(
        config: SpillConfig,
        provider: Arc<dyn ChannelProvider>,
        codec: C,
        comparator: Comparator<C::Record>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            merge_slots: config.merge_slots(),
            config,
            registry: Arc::new(ChannelRegistry::new(provider)),
            codec: Arc::new(codec),
            comparator,
            cancel: CancellationFlag::new(),
            buffer: Vec::new(),
            buffered_bytes: 0,
            spilled: Vec::new(),
            state: SorterState::Filling,
            stats: SortStats::default(),
        })
    }

    /// Observe `cancel` while spilling and merging.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a merge limiter with other sorters.
    #[must_use]
    pub fn with_merge_slots(mut self, slots: Arc<MergeSlots>) -> Self {
        self.merge_slots = Some(slots);
        self
    }

    /// Current state.
    pub const fn state(&self) -> SorterState {
        self.state
    }

    /// Statistics so far.
    pub const fn stats(&self) -> SortStats {
        self.stats
    }

    /// Estimated bytes currently buffered.
    pub const fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Channels spilled so far, in spill order.
    pub fn spilled_channels(&self) -> &[ChannelWithMeta] {
        &self.spilled
    }

    /// Registry owning this sorter's channels.
    pub const fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Cancellation flag observed by this sorter.
    pub const fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Add one record, first spilling the buffer if it reached the threshold.
    pub fn add(&mut self, record: C::Record) -> Result<()> {
        self.ensure_filling()?;
        if self.buffered_bytes >= self.config.memory_threshold {
            self.spill()?;
        }
        self.buffered_bytes += self.codec.estimated_size(&record);
        self.buffer.push(record);
        self.stats.records += 1;
        Ok(())
    }

    /// Add every record of `records`.
    pub fn extend<I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = C::Record>,
    {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    /// Sort the buffer and write it to a new channel.
    ///
    /// With a fan-in of 2 and two channels already spilled, the buffer is
    /// merged into the newest channel instead. Does nothing if the buffer is
    /// empty.
    pub fn spill(&mut self) -> Result<()> {
        self.ensure_filling()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        match self.spill_buffer() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Add every record of `records` and finish.
    pub fn sort<I>(mut self, records: I) -> Result<SortedOutput<C>>
    where
        I: IntoIterator<Item = C::Record>,
    {
        self.extend(records)?;
        self.finish()
    }

    /// Finish the input and return the sorted output.
    pub fn finish(mut self) -> Result<SortedOutput<C>> {
        self.ensure_filling()?;
        match self.finish_inner() {
            Ok(output) => Ok(output),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn ensure_filling(&self) -> Result<()> {
        match self.state {
            SorterState::Filling => Ok(()),
            SorterState::Failed => Err(SpillError::Closed(
                "sorter failed and was cleaned up".to_string(),
            )),
            state => Err(SpillError::Closed(format!("sorter is {state:?}"))),
        }
    }

    fn sort_buffer(&mut self) {
        let comparator = &self.comparator;
        self.buffer.sort_by(|a, b| comparator(a, b));
    }

    fn spill_buffer(&mut self) -> Result<()> {
        self.state = SorterState::Sorting;
        self.sort_buffer();
        let buffer = std::mem::take(&mut self.buffer);

        // An intermediate pass under fan-in 2 has one reader beside its
        // writer, so it can only pair a channel with an in-memory run.
        let fold_into = if self.config.merge_fan_in == 2 && self.spilled.len() >= 2 {
            self.spilled.pop()
        } else {
            None
        };
        let meta = if let Some(newest) = fold_into {
            debug!("Folding spill into {}", newest.channel());
            self.engine()?
                .merge_into_channel(vec![Run::Channel(newest), Run::Memory(buffer)])?
        } else {
            let mut writer = ChannelWriter::create(
                Arc::clone(&self.registry),
                self.config.block_size,
                self.cancel.clone(),
            )?;
            for record in &buffer {
                writer.write_record(self.codec.as_ref(), record)?;
            }
            writer.seal()?
        };

        self.stats.spills += 1;
        self.stats.spilled_bytes += meta.num_bytes();
        debug!(
            "Spilled run {} ({} bytes estimated, {} bytes on disk) to {}",
            self.stats.spills,
            self.buffered_bytes,
            meta.num_bytes(),
            meta.channel()
        );
        self.spilled.push(meta);
        self.buffered_bytes = 0;
        self.state = SorterState::Filling;
        Ok(())
    }

    fn engine(&self) -> Result<MergeEngine<C>> {
        Ok(MergeEngine::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.codec),
            Arc::clone(&self.comparator),
            &self.config,
        )?
        .with_cancellation(self.cancel.clone()))
    }

    fn finish_inner(&mut self) -> Result<SortedOutput<C>> {
        self.cancel.check()?;
        self.state = SorterState::Sorting;
        self.sort_buffer();
        let buffer = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;

        if self.spilled.is_empty() {
            self.state = SorterState::ReadyInMemory;
            info!("Sorted {} records in memory", self.stats.records);
            return Ok(SortedOutput {
                source: OutputSource::Memory(buffer.into_iter()),
                stats: self.stats,
                registry: Arc::clone(&self.registry),
                slot: None,
            });
        }

        let slot = match &self.merge_slots {
            Some(slots) => Some(slots.acquire(&self.cancel)?),
            None => None,
        };

        let mut runs: Vec<Run<C::Record>> = std::mem::take(&mut self.spilled)
            .into_iter()
            .map(Run::Channel)
            .collect();
        if !buffer.is_empty() {
            runs.push(Run::Memory(buffer));
        }

        let merged = self.engine()?.merge(runs)?;

        self.stats.merge = merged.stats();
        self.state = SorterState::Spilled;
        info!(
            "Sorted {} records with {} spills and {} intermediate merge passes",
            self.stats.records, self.stats.spills, self.stats.merge.intermediate_passes
        );
        Ok(SortedOutput {
            source: OutputSource::Merged(merged),
            stats: self.stats,
            registry: Arc::clone(&self.registry),
            slot,
        })
    }

    fn fail(&mut self, error: &SpillError) {
        self.state = SorterState::Failed;
        self.buffer.clear();
        self.buffered_bytes = 0;
        self.spilled.clear();
        let deleted = self.registry.delete_all();
        debug!("Sort failed ({error}); deleted {deleted} channels");
    }
}

impl<C: RecordCodec> fmt::Debug for ExternalSorter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSorter")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("buffered_records", &self.buffer.len())
            .field("buffered_bytes", &self.buffered_bytes)
            .field("spilled", &self.spilled.len())
            .finish_non_exhaustive()
    }
}

enum OutputSource<C: RecordCodec> {
    Memory(vec::IntoIter<C::Record>),
    Merged(MergeIterator<C>),
    Closed,
}

/// Sorted records produced by [`ExternalSorter::finish`].
///
/// Channels still backing the output are deleted when it is fully drained,
/// closed, or dropped. A held merge slot is released at the same time.
pub struct SortedOutput<C: RecordCodec> {
    source: OutputSource<C>,
    stats: SortStats,
    registry: Arc<ChannelRegistry>,
    slot: Option<MergeSlot>,
}

impl<C: RecordCodec> SortedOutput<C> {
    /// Whether the records come straight from memory.
    pub const fn is_in_memory(&self) -> bool {
        matches!(self.source, OutputSource::Memory(_))
    }

    /// Statistics of the sort.
    pub const fn stats(&self) -> SortStats {
        self.stats
    }

    /// Stop early and delete any remaining channels.
    pub fn close(&mut self) {
        self.source = OutputSource::Closed;
        self.slot = None;
        self.registry.delete_all();
    }
}

impl<C: RecordCodec> Iterator for SortedOutput<C> {
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match &mut self.source {
            OutputSource::Memory(records) => records.next().map(Ok),
            OutputSource::Merged(merged) => merged.next(),
            OutputSource::Closed => return None,
        };
        if next.is_none() {
            self.close();
        }
        next
    }
}

impl<C: RecordCodec> std::iter::FusedIterator for SortedOutput<C> {}

impl<C: RecordCodec> Drop for SortedOutput<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: RecordCodec> fmt::Debug for SortedOutput<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            OutputSource::Memory(_) => "memory",
            OutputSource::Merged(_) => "merged",
            OutputSource::Closed => "closed",
        };
        f.debug_struct("SortedOutput")
            .field("source", &source)
            .field("stats", &self.stats)
            .field("holds_merge_slot", &self.slot.is_some())
            .finish_non_exhaustive()
    }
}
