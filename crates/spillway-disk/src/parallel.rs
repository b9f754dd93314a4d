//! Sorting independent partitions in parallel.
//!
//! Each partition is sorted by its own [`ExternalSorter`] on tokio's blocking
//! pool. Partitions share nothing but the channel provider, a cancellation
//! flag and, when configured, the merge limiter. The first failure cancels
//! every other partition, and the call only returns once every partition
//! has stopped and deleted its channels.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::cancel::CancellationFlag;
use crate::codec::RecordCodec;
use crate::config::SpillConfig;
use crate::io::ChannelProvider;
use crate::merge::Comparator;
use crate::sorter::ExternalSorter;
use crate::{Result, SpillError};

/// Sort every partition and return the sorted partitions in input order.
pub async fn sort_partitions<C, P>(
    config: SpillConfig,
    provider: Arc<dyn ChannelProvider>,
    codec: C,
    comparator: Comparator<C::Record>,
    partitions: Vec<P>,
) -> Result<Vec<Vec<C::Record>>>
where
    C: RecordCodec + Clone + 'static,
    C::Record: 'static,
    P: IntoIterator<Item = C::Record> + Send + 'static,
{
    config.validate()?;
    let slots = config.merge_slots();
    let cancel = CancellationFlag::new();
    debug!("Sorting {} partitions", partitions.len());

    let tasks = partitions.into_iter().enumerate().map(|(index, partition)| {
        let config = config.clone();
        let provider = Arc::clone(&provider);
        let codec = codec.clone();
        let comparator = Arc::clone(&comparator);
        let cancel = cancel.clone();
        let on_panic = cancel.clone();
        let slots = slots.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut sorter =
                ExternalSorter::new(config, provider, codec, comparator)?.with_cancellation(cancel.clone());
            if let Some(slots) = slots {
                sorter = sorter.with_merge_slots(slots);
            }
            let result = sorter
                .sort(partition)
                .and_then(|output| output.collect::<Result<Vec<_>>>());
            if let Err(e) = &result
                && !matches!(e, SpillError::Cancelled)
            {
                warn!("Partition {index} failed: {e}");
                cancel.cancel();
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                on_panic.cancel();
                Err(SpillError::Task(format!("partition {index}: {e}")))
            })
        }
    });

    // Every task is awaited so no partition is still writing channels when
    // the error is returned.
    let mut sorted = Vec::with_capacity(tasks.len());
    let mut failure: Option<SpillError> = None;
    for result in join_all(tasks).await {
        match result {
            Ok(records) => sorted.push(records),
            Err(e) => {
                cancel.cancel();
                if failure
                    .as_ref()
                    .is_none_or(|first| matches!(first, SpillError::Cancelled))
                {
                    failure = Some(e);
                }
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(sorted),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{BytesCodec, I64Codec};
    use crate::io::FileIoManager;
    use crate::merge::natural_order;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partitions_keep_input_order() {
        let base = tempfile::tempdir().unwrap();
        let io = Arc::new(FileIoManager::new(&[base.path()]).unwrap());
        let config = SpillConfig::default()
            .with_block_size(64)
            .with_merge_fan_in(2)
            .with_memory_threshold(32)
            .with_max_concurrent_merges(1);

        let partitions = vec![vec![9, 7, 8], (0..50).rev().collect(), Vec::new()];
        let sorted = sort_partitions(config, io.clone(), I64Codec, natural_order(), partitions)
            .await
            .unwrap();

        assert_eq!(sorted[0], vec![7, 8, 9]);
        assert_eq!(sorted[1], (0..50).collect::<Vec<i64>>());
        assert!(sorted[2].is_empty());
        assert!(io.channel_files().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_partition_leaves_no_channels() {
        let base = tempfile::tempdir().unwrap();
        let io = Arc::new(FileIoManager::new(&[base.path()]).unwrap());
        let config = SpillConfig::default()
            .with_block_size(64)
            .with_merge_fan_in(4)
            .with_memory_threshold(16);

        let mut failing: Vec<Vec<u8>> = (0..200_u8).map(|i| vec![i, i]).collect();
        failing.push(vec![0; 100]);
        failing.push(vec![1]);
        let busy: Vec<Vec<u8>> = (0..5_000_u32).map(|i| i.to_be_bytes().to_vec()).collect();
        let partitions = vec![failing, busy.clone(), busy];

        let result =
            sort_partitions(config, io.clone(), BytesCodec, natural_order(), partitions).await;
        assert!(matches!(result, Err(SpillError::RecordTooLarge { size: 100, limit: 52 })));
        assert!(io.channel_files().unwrap().is_empty());
        assert_eq!(io.stats().live_channels(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let base = tempfile::tempdir().unwrap();
        let io = Arc::new(FileIoManager::new(&[base.path()]).unwrap());
        let config = SpillConfig::default().with_merge_fan_in(1);

        let result =
            sort_partitions(config, io, I64Codec, natural_order(), vec![vec![1_i64]]).await;
        assert!(matches!(result, Err(SpillError::Config(_))));
    }
}
