//! Temporary file provider for spill channels.
//!
//! [`ChannelProvider`] is the seam between the spill engine and the file
//! system: allocate a channel, open it for append or for reading, delete
//! it. [`FileIoManager`] is the default implementation backed by one private
//! directory per configured temp dir.

pub mod registry;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::channel::ChannelId;
use crate::{Result, SpillError};

/// Prefix of the per-instance spill directory.
const IO_DIR_PREFIX: &str = "spillway-io-";

/// File extension of channel files.
pub const CHANNEL_EXTENSION: &str = "channel";

/// Source of temporary channel files.
///
/// Implementations must hand out identifiers that are unique for the
/// lifetime of the provider.
pub trait ChannelProvider: Send + Sync + fmt::Debug {
    /// Allocate a new, empty channel.
    fn allocate(&self) -> Result<ChannelId>;

    /// Open a channel for appending blocks.
    fn open_append(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>>;

    /// Open a channel for sequential reading.
    fn open_read(&self, channel: &ChannelId) -> Result<Box<dyn Read + Send>>;

    /// Delete a channel file.
    fn delete(&self, channel: &ChannelId) -> Result<()>;
}

/// Handle and channel counters of a [`FileIoManager`].
#[derive(Debug, Default)]
pub struct IoStats {
    open_readers: AtomicUsize,
    open_writers: AtomicUsize,
    peak_readers: AtomicUsize,
    peak_handles: AtomicUsize,
    channels_created: AtomicU64,
    channels_deleted: AtomicU64,
}

impl IoStats {
    /// Currently open read handles.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::Acquire)
    }

    /// Currently open write handles.
    pub fn open_writers(&self) -> usize {
        self.open_writers.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously open read handles.
    pub fn peak_readers(&self) -> usize {
        self.peak_readers.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously open handles of either kind.
    pub fn peak_handles(&self) -> usize {
        self.peak_handles.load(Ordering::Acquire)
    }

    /// Channels allocated so far.
    pub fn channels_created(&self) -> u64 {
        self.channels_created.load(Ordering::Acquire)
    }

    /// Channels deleted so far.
    pub fn channels_deleted(&self) -> u64 {
        self.channels_deleted.load(Ordering::Acquire)
    }

    /// Channels allocated and not yet deleted.
    pub fn live_channels(&self) -> u64 {
        self.channels_created()
            .saturating_sub(self.channels_deleted())
    }

    fn handle_opened(&self, kind: HandleKind) {
        let readers = match kind {
            HandleKind::Read => self.open_readers.fetch_add(1, Ordering::AcqRel) + 1,
            HandleKind::Write => {
                self.open_writers.fetch_add(1, Ordering::AcqRel);
                self.open_readers()
            }
        };
        self.peak_readers.fetch_max(readers, Ordering::AcqRel);
        self.peak_handles
            .fetch_max(readers + self.open_writers(), Ordering::AcqRel);
    }

    fn handle_closed(&self, kind: HandleKind) {
        match kind {
            HandleKind::Read => self.open_readers.fetch_sub(1, Ordering::AcqRel),
            HandleKind::Write => self.open_writers.fetch_sub(1, Ordering::AcqRel),
        };
    }
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
    Read,
    Write,
}

/// File handle that keeps [`IoStats`] up to date while it is open.
struct TrackedHandle {
    file: File,
    kind: HandleKind,
    stats: Arc<IoStats>,
}

impl TrackedHandle {
    fn new(file: File, kind: HandleKind, stats: Arc<IoStats>) -> Self {
        stats.handle_opened(kind);
        Self { file, kind, stats }
    }
}

impl Read for TrackedHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TrackedHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for TrackedHandle {
    fn drop(&mut self) {
        self.stats.handle_closed(self.kind);
    }
}

/// File-system channel provider.
///
/// Creates one private `spillway-io-*` directory inside each configured temp
/// directory and spreads channels across them round-robin. The directories
/// and anything left in them are removed when the manager is dropped.
pub struct FileIoManager {
    dirs: Vec<TempDir>,
    next_index: AtomicU64,
    stats: Arc<IoStats>,
}

impl FileIoManager {
    /// Create the spill directories.
    pub fn new<P: AsRef<Path>>(temp_dirs: &[P]) -> Result<Self> {
        if temp_dirs.is_empty() {
            return Err(SpillError::Config(
                "at least one temp directory is required".to_string(),
            ));
        }

        let mut dirs = Vec::with_capacity(temp_dirs.len());
        for base in temp_dirs {
            let base = base.as_ref();
            fs::create_dir_all(base).map_err(|e| {
                SpillError::ResourceExhausted(format!(
                    "cannot create temp directory {}: {e}",
                    base.display()
                ))
            })?;
            let dir = tempfile::Builder::new()
                .prefix(IO_DIR_PREFIX)
                .tempdir_in(base)
                .map_err(|e| {
                    SpillError::ResourceExhausted(format!(
                        "cannot create spill directory in {}: {e}",
                        base.display()
                    ))
                })?;
            debug!("Created spill directory {}", dir.path().display());
            dirs.push(dir);
        }

        info!("Spill I/O manager using {} directories", dirs.len());
        Ok(Self {
            dirs,
            next_index: AtomicU64::new(0),
            stats: Arc::new(IoStats::default()),
        })
    }

    /// Spill directories owned by this manager.
    pub fn directories(&self) -> Vec<&Path> {
        self.dirs.iter().map(TempDir::path).collect()
    }

    /// Handle and channel counters.
    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Channel files currently present on disk.
    pub fn channel_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            for entry in fs::read_dir(dir.path())? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == CHANNEL_EXTENSION) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

impl fmt::Debug for FileIoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileIoManager")
            .field("dirs", &self.directories())
            .field("next_index", &self.next_index.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChannelProvider for FileIoManager {
    fn allocate(&self) -> Result<ChannelId> {
        let index = self.next_index.fetch_add(1, Ordering::AcqRel);
        let dir = &self.dirs[(index % self.dirs.len() as u64) as usize];
        let path = dir
            .path()
            .join(format!("{index:06}.{CHANNEL_EXTENSION}"));

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                SpillError::ResourceExhausted(format!(
                    "cannot allocate channel file {}: {e}",
                    path.display()
                ))
            })?;

        self.stats.channels_created.fetch_add(1, Ordering::AcqRel);
        Ok(ChannelId::new(index, path))
    }

    fn open_append(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .append(true)
            .open(channel.path())
            .map_err(|e| SpillError::channel_io(channel, e))?;
        Ok(Box::new(TrackedHandle::new(
            file,
            HandleKind::Write,
            Arc::clone(&self.stats),
        )))
    }

    fn open_read(&self, channel: &ChannelId) -> Result<Box<dyn Read + Send>> {
        let file = File::open(channel.path()).map_err(|e| SpillError::channel_io(channel, e))?;
        Ok(Box::new(TrackedHandle::new(
            file,
            HandleKind::Read,
            Arc::clone(&self.stats),
        )))
    }

    fn delete(&self, channel: &ChannelId) -> Result<()> {
        fs::remove_file(channel.path()).map_err(|e| SpillError::channel_io(channel, e))?;
        self.stats.channels_deleted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unique_channels() {
        let base = tempfile::tempdir().unwrap();
        let io = FileIoManager::new(&[base.path()]).unwrap();

        let a = io.allocate().unwrap();
        let b = io.allocate().unwrap();
        assert_ne!(a, b);
        assert_ne!(a.path(), b.path());
        assert!(a.path().exists());
        assert_eq!(io.stats().channels_created(), 2);
        assert_eq!(io.channel_files().unwrap().len(), 2);

        io.delete(&a).unwrap();
        let c = io.allocate().unwrap();
        assert_ne!(c.index(), a.index());
        assert_eq!(io.stats().live_channels(), 2);
    }

    #[test]
    fn test_round_robin_directories() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let io = FileIoManager::new(&[first.path(), second.path()]).unwrap();

        let a = io.allocate().unwrap();
        let b = io.allocate().unwrap();
        assert!(a.path().starts_with(first.path()));
        assert!(b.path().starts_with(second.path()));
    }

    #[test]
    fn test_handles_are_tracked() {
        let base = tempfile::tempdir().unwrap();
        let io = FileIoManager::new(&[base.path()]).unwrap();
        let channel = io.allocate().unwrap();

        let mut writer = io.open_append(&channel).unwrap();
        writer.write_all(b"abc").unwrap();
        assert_eq!(io.stats().open_writers(), 1);
        drop(writer);
        assert_eq!(io.stats().open_writers(), 0);

        let r1 = io.open_read(&channel).unwrap();
        let r2 = io.open_read(&channel).unwrap();
        assert_eq!(io.stats().open_readers(), 2);
        drop((r1, r2));
        assert_eq!(io.stats().open_readers(), 0);
        assert_eq!(io.stats().peak_readers(), 2);
    }

    #[test]
    fn test_directories_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let io = FileIoManager::new(&[base.path()]).unwrap();
        io.allocate().unwrap();
        let dir = io.directories()[0].to_path_buf();
        assert!(dir.exists());

        drop(io);
        assert!(!dir.exists());
    }

    #[test]
    fn test_delete_missing_channel_fails() {
        let base = tempfile::tempdir().unwrap();
        let io = FileIoManager::new(&[base.path()]).unwrap();
        let channel = io.allocate().unwrap();
        io.delete(&channel).unwrap();
        assert!(io.delete(&channel).is_err());
    }

    #[test]
    fn test_requires_a_directory() {
        let empty: [&Path; 0] = [];
        assert!(matches!(
            FileIoManager::new(&empty),
            Err(SpillError::Config(_))
        ));
    }
}
