//! Directory policy for heap dump files.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use log::warn;

/// How many heap dumps a default provider keeps around before pruning.
pub const DEFAULT_MAX_STORED_HEAP_DUMPS: usize = 7;

/// File name suffix shared by every heap dump this crate writes.
pub const HEAP_DUMP_SUFFIX: &str = ".heapdump.json";

/// Chooses where heap dumps are written and enforces a retention cap.
pub trait LeakDirectoryProvider: Send + Sync {
  /// The directory heap dumps land in. The directory may not exist yet.
  fn leak_directory(&self) -> PathBuf;

  /// Reserve a path for a fresh heap dump, pruning old dumps as needed.
  ///
  /// # Errors
  ///
  /// Returns an error if the dump directory cannot be created or listed.
  fn new_heap_dump_file(&self) -> io::Result<PathBuf>;
}

/// Default policy: dumps live under `<base>/refwatch/` and at most
/// `max_stored` of them are kept, oldest pruned first.
#[derive(Debug)]
pub struct DefaultLeakDirectoryProvider {
  base_dir: PathBuf,
  max_stored: usize,
  sequence: AtomicU64,
}

impl DefaultLeakDirectoryProvider {
  #[must_use]
  pub fn max_stored(&self) -> usize {
    self.max_stored
  }

  #[must_use]
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self::with_max(base_dir, DEFAULT_MAX_STORED_HEAP_DUMPS)
  }

  fn prune_old_dumps(&self, dir: &Path) -> io::Result<()> {
    let mut dumps = existing_heap_dumps(dir)?;

    if dumps.len() < self.max_stored {
      return Ok(());
    }

    dumps.sort();

    let excess = dumps.len() + 1 - self.max_stored;

    for (_, path) in dumps.into_iter().take(excess) {
      if let Err(err) = fs::remove_file(&path) {
        warn!("failed to remove old heap dump {}: {err}", path.display());
      }
    }

    Ok(())
  }

  #[must_use]
  pub fn with_max(base_dir: impl Into<PathBuf>, max_stored: usize) -> Self {
    Self {
      base_dir: base_dir.into(),
      max_stored: max_stored.max(1),
      sequence: AtomicU64::new(0),
    }
  }
}

impl LeakDirectoryProvider for DefaultLeakDirectoryProvider {
  fn leak_directory(&self) -> PathBuf {
    self.base_dir.join("refwatch")
  }

  fn new_heap_dump_file(&self) -> io::Result<PathBuf> {
    let dir = self.leak_directory();

    fs::create_dir_all(&dir)?;
    self.prune_old_dumps(&dir)?;

    let timestamp = epoch_millis();
    let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

    Ok(dir.join(format!("refwatch-{timestamp}-{sequence}{HEAP_DUMP_SUFFIX}")))
  }
}

fn epoch_millis() -> u64 {
  SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    .unwrap_or(0)
}

fn existing_heap_dumps(dir: &Path) -> io::Result<Vec<(SystemTime, PathBuf)>> {
  let mut dumps = Vec::new();

  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();

    let is_dump = path
      .file_name()
      .and_then(OsStr::to_str)
      .is_some_and(|name| name.ends_with(HEAP_DUMP_SUFFIX));

    if !is_dump {
      continue;
    }

    let modified = entry
      .metadata()?
      .modified()
      .unwrap_or(SystemTime::UNIX_EPOCH);

    dumps.push((modified, path));
  }

  Ok(dumps)
}
