use super::*;

/// Errors raised while capturing a heap snapshot to disk.
#[derive(Debug)]
pub enum DumpError {
  Io(io::Error),
  Json(serde_json::Error),
}

impl Display for DumpError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(err) => write!(f, "i/o error while dumping heap: {err}"),
      Self::Json(err) => {
        write!(f, "failed to encode heap snapshot as json: {err}")
      }
    }
  }
}

impl std::error::Error for DumpError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      Self::Json(err) => Some(err),
    }
  }
}

impl From<io::Error> for DumpError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

impl From<serde_json::Error> for DumpError {
  fn from(value: serde_json::Error) -> Self {
    Self::Json(value)
  }
}

/// A reference the watcher still considers reachable at snapshot time.
#[derive(Clone, Debug, Serialize)]
pub struct RetainedRecord {
  pub key: u64,
  pub name: String,
  pub watched_for_ms: u64,
}

/// Process memory counters sampled alongside a snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct MemoryStats {
  pub resident_bytes: u64,
  pub virtual_bytes: u64,
}

impl MemoryStats {
  #[must_use]
  pub fn sample() -> Self {
    let Ok(pid) = sysinfo::get_current_pid() else {
      return Self::default();
    };

    let mut system = System::new();

    if !system.refresh_process(pid) {
      return Self::default();
    }

    match system.process(pid) {
      Some(process) => Self {
        resident_bytes: process.memory(),
        virtual_bytes: process.virtual_memory(),
      },
      None => Self::default(),
    }
  }
}

/// Point-in-time view of everything the watcher still considers retained,
/// written to a file for offline analysis.
#[derive(Clone, Debug)]
pub struct HeapSnapshot {
  memory: MemoryStats,
  retained: Vec<RetainedRecord>,
  taken_at: SystemTime,
}

impl Serialize for HeapSnapshot {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("HeapSnapshot", 3)?;
    state.serialize_field("taken_at_ms", &system_time_to_millis(self.taken_at))?;
    state.serialize_field("memory", &self.memory)?;
    state.serialize_field("retained", &self.retained)?;
    state.end()
  }
}

impl HeapSnapshot {
  #[must_use]
  pub fn capture(retained: Vec<RetainedRecord>) -> Self {
    Self {
      memory: MemoryStats::sample(),
      retained,
      taken_at: SystemTime::now(),
    }
  }

  /// Serialize the snapshot to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), DumpError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  #[must_use]
  pub fn memory(&self) -> MemoryStats {
    self.memory
  }

  #[must_use]
  pub fn retained(&self) -> &[RetainedRecord] {
    &self.retained
  }
}

/// Captures a heap snapshot to a file chosen by the directory provider.
pub trait HeapDumper: Send + Sync {
  /// # Errors
  ///
  /// Returns an error when the snapshot cannot be persisted; the caller is
  /// expected to retry later.
  fn dump_heap(&self, snapshot: &HeapSnapshot) -> Result<PathBuf, DumpError>;
}

/// Dumper that streams snapshots into the configured leak directory.
pub struct FileHeapDumper {
  directory_provider: Arc<dyn LeakDirectoryProvider>,
}

impl FileHeapDumper {
  #[must_use]
  pub fn new(directory_provider: Arc<dyn LeakDirectoryProvider>) -> Self {
    Self { directory_provider }
  }
}

impl HeapDumper for FileHeapDumper {
  fn dump_heap(&self, snapshot: &HeapSnapshot) -> Result<PathBuf, DumpError> {
    let path = self.directory_provider.new_heap_dump_file()?;

    let mut writer = BufWriter::new(File::create(&path)?);
    snapshot.export_json(&mut writer)?;
    writer.flush()?;

    debug!("wrote heap snapshot to {}", path.display());

    Ok(path)
  }
}

/// Dumper for the inert watcher; always reports failure so nothing is
/// written.
#[derive(Debug, Default)]
pub struct NoopHeapDumper;

impl HeapDumper for NoopHeapDumper {
  fn dump_heap(&self, _snapshot: &HeapSnapshot) -> Result<PathBuf, DumpError> {
    Err(DumpError::Io(io::Error::new(
      io::ErrorKind::Unsupported,
      "heap dumping is disabled",
    )))
  }
}

fn system_time_to_millis(ts: SystemTime) -> u64 {
  ts.duration_since(SystemTime::UNIX_EPOCH)
    .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::leak_dir::DefaultLeakDirectoryProvider;
  use std::sync::Arc;

  fn sample_snapshot() -> HeapSnapshot {
    HeapSnapshot::capture(vec![RetainedRecord {
      key: 1,
      name: "app::MainView".into(),
      watched_for_ms: 5250,
    }])
  }

  #[test]
  fn writes_parseable_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = Arc::new(DefaultLeakDirectoryProvider::new(dir.path()));
    let dumper = FileHeapDumper::new(provider);

    let path = dumper.dump_heap(&sample_snapshot()).expect("dump");
    let raw = std::fs::read_to_string(&path).expect("read dump");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");

    assert_eq!(value["retained"][0]["name"], "app::MainView");
    assert_eq!(value["retained"][0]["watched_for_ms"], 5250);
    assert!(value["taken_at_ms"].as_u64().is_some());
  }

  #[test]
  fn memory_sample_does_not_panic() {
    let _ = MemoryStats::sample();
  }

  #[test]
  fn noop_dumper_reports_failure() {
    assert!(NoopHeapDumper.dump_heap(&sample_snapshot()).is_err());
  }
}
