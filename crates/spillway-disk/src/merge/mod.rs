//! Bounded fan-in k-way merge of sorted runs.
//!
//! Runs are merged through a min-heap keyed on each run's head record, ties
//! broken by run position so equal records keep their input order. When
//! there are more runs than the fan-in, consecutive groups of runs are merged
//! into new channels and the pass repeats until the remaining runs fit into
//! one final merge.
//!
//! The fan-in bounds every open file handle, not only readers. The final
//! merge may read `fan_in` channels; an intermediate group also needs its
//! output writer, so it holds at most `fan_in - 1` channel runs next to any
//! number of in-memory runs, up to `fan_in` runs in total.

pub mod iterator;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::cancel::CancellationFlag;
use crate::channel::ChannelWithMeta;
use crate::channel::reader::ChannelReader;
use crate::channel::writer::ChannelWriter;
use crate::codec::RecordCodec;
use crate::config::SpillConfig;
use crate::io::registry::ChannelRegistry;
use crate::{Result, SpillError};
use iterator::{MergeIterator, RunCursor};

/// Total order over records.
pub type Comparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Wrap a comparison function.
pub fn comparator<R, F>(compare: F) -> Comparator<R>
where
    F: Fn(&R, &R) -> Ordering + Send + Sync + 'static,
{
    Arc::new(compare)
}

/// The record type's own [`Ord`].
pub fn natural_order<R: Ord + 'static>() -> Comparator<R> {
    Arc::new(|a: &R, b: &R| a.cmp(b))
}

/// One sorted input of a merge.
#[derive(Debug)]
pub enum Run<R> {
    /// Records held in memory.
    Memory(Vec<R>),
    /// A sealed spill channel.
    Channel(ChannelWithMeta),
}

/// Work done by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Runs handed to the merge.
    pub runs_merged: usize,
    /// Intermediate passes performed.
    pub intermediate_passes: usize,
    /// Channels written by intermediate passes.
    pub intermediate_channels: usize,
}

/// Merges sorted runs with a bounded number of open channel readers.
pub struct MergeEngine<C: RecordCodec> {
    registry: Arc<ChannelRegistry>,
    codec: Arc<C>,
    comparator: Comparator<C::Record>,
    block_size: usize,
    fan_in: usize,
    cancel: CancellationFlag,
}

impl<C: RecordCodec> MergeEngine<C> {
    /// Create an engine writing intermediate channels into `registry`.
    pub fn new(
        registry: Arc<ChannelRegistry>,
        codec: Arc<C>,
        comparator: Comparator<C::Record>,
        config: &SpillConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            codec,
            comparator,
            block_size: config.block_size,
            fan_in: config.merge_fan_in,
            cancel: CancellationFlag::new(),
        })
    }

    /// Observe `cancel` at every block read and write.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Merge `runs` into one ordered stream.
    ///
    /// Equal records come out in the order of the runs that hold them. On
    /// failure every channel in the registry is deleted before the error is
    /// returned.
    pub fn merge(&self, runs: Vec<Run<C::Record>>) -> Result<MergeIterator<C>> {
        let mut stats = MergeStats {
            runs_merged: runs.len(),
            ..MergeStats::default()
        };
        match self.merge_passes(runs, &mut stats) {
            Ok(iter) => Ok(iter),
            Err(e) => {
                let deleted = self.registry.delete_all();
                debug!("Merge failed ({e}); deleted {deleted} channels");
                Err(e)
            }
        }
    }

    fn merge_passes(
        &self,
        mut runs: Vec<Run<C::Record>>,
        stats: &mut MergeStats,
    ) -> Result<MergeIterator<C>> {
        while runs.len() > self.fan_in {
            self.cancel.check()?;
            stats.intermediate_passes += 1;
            debug!(
                "Intermediate merge pass {}: {} runs, fan-in {}",
                stats.intermediate_passes,
                runs.len(),
                self.fan_in
            );

            let before = runs.len();
            let mut next = Vec::with_capacity(before);
            for group in self.group_runs(runs) {
                if group.len() == 1 {
                    next.extend(group);
                } else {
                    let meta = self.merge_into_channel(group)?;
                    stats.intermediate_channels += 1;
                    next.push(Run::Channel(meta));
                }
            }
            if next.len() == before {
                let fan_in = self.fan_in;
                return Err(SpillError::ResourceExhausted(format!(
                    "fan-in {fan_in} cannot reduce {before} runs within {fan_in} open handles"
                )));
            }
            runs = next;
        }
        self.open(runs, *stats)
    }

    /// Split `runs` into consecutive groups that fit one intermediate merge.
    fn group_runs(&self, runs: Vec<Run<C::Record>>) -> Vec<Vec<Run<C::Record>>> {
        let max_channels = self.fan_in - 1;
        let mut groups = Vec::new();
        let mut group: Vec<Run<C::Record>> = Vec::new();
        let mut channels = 0;
        for run in runs {
            let is_channel = matches!(run, Run::Channel(_));
            if group.len() == self.fan_in || (is_channel && channels == max_channels) {
                groups.push(std::mem::take(&mut group));
                channels = 0;
            }
            if is_channel {
                channels += 1;
            }
            group.push(run);
        }
        if !group.is_empty() {
            groups.push(group);
        }
        groups
    }

    /// Merge `group` into a new sealed channel.
    ///
    /// Readers for the group are opened before the writer, so the group must
    /// hold fewer than `fan_in` channel runs to stay within the handle bound.
    pub(crate) fn merge_into_channel(&self, group: Vec<Run<C::Record>>) -> Result<ChannelWithMeta> {
        let merged = self.open(group, MergeStats::default())?;
        let mut writer =
            ChannelWriter::create(Arc::clone(&self.registry), self.block_size, self.cancel.clone())?;
        for record in merged {
            writer.write_record(self.codec.as_ref(), &record?)?;
        }
        writer.seal()
    }

    fn open(&self, runs: Vec<Run<C::Record>>, stats: MergeStats) -> Result<MergeIterator<C>> {
        let mut cursors = Vec::with_capacity(runs.len());
        for run in runs {
            let cursor = match run {
                Run::Memory(records) => RunCursor::Memory(records.into_iter()),
                Run::Channel(meta) => RunCursor::Channel(ChannelReader::open(
                    &**self.registry.provider(),
                    meta,
                    self.block_size,
                    Arc::clone(&self.codec),
                    self.cancel.clone(),
                )?),
            };
            cursors.push(cursor);
        }
        MergeIterator::new(
            cursors,
            Arc::clone(&self.comparator),
            Arc::clone(&self.registry),
            stats,
        )
    }
}

impl<C: RecordCodec> std::fmt::Debug for MergeEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("block_size", &self.block_size)
            .field("fan_in", &self.fan_in)
            .finish_non_exhaustive()
    }
}
