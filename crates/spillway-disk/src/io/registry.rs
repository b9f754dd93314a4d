//! Registry of live channels owned by one sort task.
//!
//! Writers, readers and merge passes only hold [`ChannelId`]s; the registry
//! is the single owner of the files and the only place they are deleted.
//! Dropping the registry deletes whatever is still registered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::channel::{ChannelId, ChannelWithMeta};
use crate::io::ChannelProvider;

#[derive(Debug)]
struct Entry {
    channel: ChannelId,
    meta: Option<ChannelWithMeta>,
}

/// Indexed owner of every channel created by one task.
pub struct ChannelRegistry {
    provider: Arc<dyn ChannelProvider>,
    entries: Mutex<BTreeMap<u64, Entry>>,
}

impl ChannelRegistry {
    /// Empty registry allocating from `provider`.
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            provider,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Provider backing this registry.
    pub fn provider(&self) -> &Arc<dyn ChannelProvider> {
        &self.provider
    }

    /// Allocate and register a new channel.
    pub fn allocate(&self) -> Result<ChannelId> {
        let channel = self.provider.allocate()?;
        self.entries.lock().insert(
            channel.index(),
            Entry {
                channel: channel.clone(),
                meta: None,
            },
        );
        Ok(channel)
    }

    /// Record the metadata of a sealed channel.
    pub fn seal(&self, meta: ChannelWithMeta) {
        if let Some(entry) = self.entries.lock().get_mut(&meta.channel().index()) {
            entry.meta = Some(meta);
        }
    }

    /// Delete a channel and remove it from the registry.
    ///
    /// Releasing a channel that is no longer registered is a no-op, so each
    /// file is deleted at most once.
    pub fn release(&self, channel: &ChannelId) -> Result<()> {
        let removed = self.entries.lock().remove(&channel.index());
        if let Some(entry) = removed {
            self.provider.delete(&entry.channel)?;
            debug!("Deleted {}", entry.channel);
        }
        Ok(())
    }

    /// Like [`release`](Self::release), logging instead of returning errors.
    pub fn discard(&self, channel: &ChannelId) {
        if let Err(e) = self.release(channel) {
            warn!("Failed to delete {channel}: {e}");
        }
    }

    /// Delete every registered channel. Returns how many were deleted.
    ///
    /// Deletion failures are logged and do not stop the sweep.
    pub fn delete_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut deleted = 0;
        for entry in entries.into_values() {
            match self.provider.delete(&entry.channel) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete {} during cleanup: {e}", entry.channel),
            }
        }
        if deleted > 0 {
            debug!("Cleaned up {deleted} channels");
        }
        deleted
    }

    /// Metadata of every sealed channel still registered, in allocation order.
    pub fn sealed(&self) -> Vec<ChannelWithMeta> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| entry.meta.clone())
            .collect()
    }

    /// Whether a channel is registered.
    pub fn contains(&self, channel: &ChannelId) -> bool {
        self.entries.lock().contains_key(&channel.index())
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("provider", &self.provider)
            .field("channels", &self.len())
            .finish()
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.delete_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::FileIoManager;

    fn registry() -> (tempfile::TempDir, Arc<FileIoManager>, ChannelRegistry) {
        let base = tempfile::tempdir().unwrap();
        let io = Arc::new(FileIoManager::new(&[base.path()]).unwrap());
        let registry = ChannelRegistry::new(io.clone());
        (base, io, registry)
    }

    #[test]
    fn test_release_deletes_once() {
        let (_base, io, registry) = registry();
        let channel = registry.allocate().unwrap();
        assert!(registry.contains(&channel));

        registry.release(&channel).unwrap();
        registry.release(&channel).unwrap();
        assert!(!channel.path().exists());
        assert_eq!(io.stats().channels_deleted(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sealed_lists_only_sealed_channels() {
        let (_base, _io, registry) = registry();
        let a = registry.allocate().unwrap();
        let _b = registry.allocate().unwrap();
        registry.seal(ChannelWithMeta::new(a.clone(), 0, 0, 0));

        let sealed = registry.sealed();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].channel(), &a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_delete_all_and_drop() {
        let (_base, io, registry) = registry();
        for _ in 0..3 {
            registry.allocate().unwrap();
        }
        assert_eq!(registry.delete_all(), 3);
        assert!(io.channel_files().unwrap().is_empty());

        registry.allocate().unwrap();
        drop(registry);
        assert!(io.channel_files().unwrap().is_empty());
        assert_eq!(io.stats().live_channels(), 0);
    }
}
