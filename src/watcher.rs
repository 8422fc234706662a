//! The reference watcher: tracks handles the host expected to be reclaimed
//! and escalates the ones that survive their grace period.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use log::{debug, warn};
use nohash_hasher::BuildNoHashHasher;

use crate::debugger::{DebuggerControl, SystemDebuggerControl};
use crate::dumper::{HeapDumper, HeapSnapshot, NoopHeapDumper, RetainedRecord};
use crate::excluded::ExcludedRefs;
use crate::executor::{NoopWatchExecutor, Retry, WatchExecutor};
use crate::listener::{HeapDump, HeapDumpListener, NoopHeapDumpListener};

type RetainedMap = DashMap<u64, WatchedReference, BuildNoHashHasher<u64>>;

struct WatchedReference {
  handle: Weak<dyn Any + Send + Sync>,
  name: String,
  since: Instant,
}

struct WatcherInner {
  debugger_control: Arc<dyn DebuggerControl>,
  excluded: ExcludedRefs,
  heap_dumper: Arc<dyn HeapDumper>,
  inert: bool,
  listener: Arc<dyn HeapDumpListener>,
  next_key: AtomicU64,
  retained: RetainedMap,
  watch_executor: Arc<dyn WatchExecutor>,
}

/// Entry point for registering references and, once a grace period passes,
/// turning the ones that are still reachable into heap dumps.
///
/// Cheap to clone; all clones share the same retained set.
#[derive(Clone)]
pub struct RefWatcher {
  inner: Arc<WatcherInner>,
}

impl fmt::Debug for RefWatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefWatcher")
      .field("inert", &self.inner.inert)
      .field("retained", &self.inner.retained.len())
      .finish()
  }
}

impl RefWatcher {
  fn assemble(
    debugger_control: Arc<dyn DebuggerControl>,
    excluded: ExcludedRefs,
    heap_dumper: Arc<dyn HeapDumper>,
    listener: Arc<dyn HeapDumpListener>,
    watch_executor: Arc<dyn WatchExecutor>,
    inert: bool,
  ) -> Self {
    Self {
      inner: Arc::new(WatcherInner {
        debugger_control,
        excluded,
        heap_dumper,
        inert,
        listener,
        next_key: AtomicU64::new(1),
        retained: RetainedMap::with_hasher(BuildNoHashHasher::default()),
        watch_executor,
      }),
    }
  }

  /// A watcher that satisfies the interface but performs no tracking,
  /// dumping, or analysis.
  #[must_use]
  pub(crate) fn inert() -> Self {
    Self::assemble(
      Arc::new(SystemDebuggerControl),
      ExcludedRefs::none(),
      Arc::new(NoopHeapDumper),
      Arc::new(NoopHeapDumpListener),
      Arc::new(NoopWatchExecutor),
      true,
    )
  }

  #[must_use]
  pub fn is_inert(&self) -> bool {
    self.inner.inert
  }

  #[must_use]
  pub(crate) fn new(
    debugger_control: Arc<dyn DebuggerControl>,
    excluded: ExcludedRefs,
    heap_dumper: Arc<dyn HeapDumper>,
    listener: Arc<dyn HeapDumpListener>,
    watch_executor: Arc<dyn WatchExecutor>,
  ) -> Self {
    Self::assemble(
      debugger_control,
      excluded,
      heap_dumper,
      listener,
      watch_executor,
      false,
    )
  }

  /// How many references are currently tracked as not-yet-reclaimed.
  #[must_use]
  pub fn retained_count(&self) -> usize {
    self.inner.retained.len()
  }

  pub(crate) fn shares_inner(&self, other: &RefWatcher) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Register a handle the host expects to be reclaimed shortly.
  ///
  /// The reachability check runs on the watch executor after its configured
  /// delay; a handle that no longer upgrades by then is forgotten silently.
  pub fn watch(&self, handle: Weak<dyn Any + Send + Sync>, name: impl Into<String>) {
    let name = name.into();

    if self.inner.inert {
      debug!("inert watcher ignoring {name}");
      return;
    }

    let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);

    self.inner.retained.insert(
      key,
      WatchedReference {
        handle,
        name,
        since: Instant::now(),
      },
    );

    let inner = Arc::clone(&self.inner);

    self
      .inner
      .watch_executor
      .execute(Box::new(move || ensure_gone(&inner, key)));
  }
}

fn capture_snapshot(inner: &WatcherInner) -> HeapSnapshot {
  let retained = inner
    .retained
    .iter()
    .map(|entry| RetainedRecord {
      key: *entry.key(),
      name: entry.value().name.clone(),
      watched_for_ms: u64::try_from(entry.value().since.elapsed().as_millis())
        .unwrap_or(u64::MAX),
    })
    .collect();

  HeapSnapshot::capture(retained)
}

fn ensure_gone(inner: &WatcherInner, key: u64) -> Retry {
  let Some(entry) = inner.retained.get(&key) else {
    return Retry::Done;
  };

  let handle = entry.handle.clone();
  let name = entry.name.clone();
  let since = entry.since;

  // Drop the map guard before touching the map again.
  drop(entry);

  if handle.upgrade().is_none() {
    inner.retained.remove(&key);
    debug!("{name} was reclaimed in time");
    return Retry::Done;
  }

  if let Some(reason) = inner.excluded.match_reason(&name) {
    inner.retained.remove(&key);
    debug!("ignoring excluded reference {name}: {reason}");
    return Retry::Done;
  }

  if inner.debugger_control.is_debugger_attached() {
    debug!("debugger attached; delaying reachability check for {name}");
    return Retry::Later;
  }

  let snapshot = capture_snapshot(inner);
  let dump_started = Instant::now();

  match inner.heap_dumper.dump_heap(&snapshot) {
    Err(err) => {
      warn!("heap dump for {name} failed, will retry: {err}");
      Retry::Later
    }
    Ok(file) => {
      inner.retained.remove(&key);
      inner.listener.on_heap_dump(HeapDump {
        dump_duration: dump_started.elapsed(),
        file,
        key,
        name,
        watch_duration: since.elapsed(),
      });
      Retry::Done
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dumper::FileHeapDumper;
  use crate::executor::DeferredWatchExecutor;
  use crate::leak_dir::DefaultLeakDirectoryProvider;
  use std::sync::Mutex;
  use std::thread;
  use std::time::Duration;
  use tempfile::TempDir;

  #[derive(Default)]
  struct CollectingListener {
    dumps: Mutex<Vec<HeapDump>>,
  }

  impl CollectingListener {
    fn count(&self) -> usize {
      self.dumps.lock().expect("dumps").len()
    }
  }

  impl HeapDumpListener for CollectingListener {
    fn on_heap_dump(&self, dump: HeapDump) {
      self.dumps.lock().expect("dumps").push(dump);
    }
  }

  struct FixedDebugger(bool);

  impl DebuggerControl for FixedDebugger {
    fn is_debugger_attached(&self) -> bool {
      self.0
    }
  }

  fn test_watcher(
    excluded: ExcludedRefs,
    debugger_attached: bool,
  ) -> (RefWatcher, Arc<CollectingListener>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = Arc::new(DefaultLeakDirectoryProvider::new(dir.path()));
    let listener = Arc::new(CollectingListener::default());

    let watcher = RefWatcher::new(
      Arc::new(FixedDebugger(debugger_attached)),
      excluded,
      Arc::new(FileHeapDumper::new(provider)),
      listener.clone(),
      Arc::new(DeferredWatchExecutor::new(Duration::ZERO)),
    );

    (watcher, listener, dir)
  }

  fn wait_for(predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
      if predicate() {
        return true;
      }
      thread::sleep(Duration::from_millis(10));
    }
    predicate()
  }

  #[test]
  fn retained_reference_produces_a_dump() {
    let (watcher, listener, _dir) = test_watcher(ExcludedRefs::none(), false);

    let leaked: Arc<dyn Any + Send + Sync> = Arc::new(String::from("still here"));
    watcher.watch(Arc::downgrade(&leaked), "app::LeakyView");

    assert!(wait_for(|| listener.count() == 1));

    let dumps = listener.dumps.lock().expect("dumps");
    assert_eq!(dumps[0].name, "app::LeakyView");
    assert!(dumps[0].file.exists());
    assert_eq!(watcher.retained_count(), 0);

    drop(leaked);
  }

  #[test]
  fn reclaimed_reference_is_forgotten_silently() {
    let (watcher, listener, _dir) = test_watcher(ExcludedRefs::none(), false);

    let short_lived = Arc::new(String::from("gone soon"));
    let handle = Arc::downgrade(&short_lived);
    drop(short_lived);
    watcher.watch(handle, "app::Transient");

    assert!(wait_for(|| watcher.retained_count() == 0));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(listener.count(), 0);
  }

  #[test]
  fn excluded_reference_never_dumps() {
    let excluded = ExcludedRefs::builder()
      .named("host::Clipboard", "known leak")
      .build();
    let (watcher, listener, _dir) = test_watcher(excluded, false);

    let pinned: Arc<dyn Any + Send + Sync> =
      Arc::new(String::from("pinned by the host"));
    watcher.watch(Arc::downgrade(&pinned), "host::Clipboard");

    assert!(wait_for(|| watcher.retained_count() == 0));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(listener.count(), 0);

    drop(pinned);
  }

  #[test]
  fn attached_debugger_defers_the_check() {
    let (watcher, listener, _dir) = test_watcher(ExcludedRefs::none(), true);

    let held: Arc<dyn Any + Send + Sync> =
      Arc::new(String::from("paused under debugger"));
    watcher.watch(Arc::downgrade(&held), "app::Paused");

    thread::sleep(Duration::from_millis(150));
    assert_eq!(listener.count(), 0);
    assert_eq!(watcher.retained_count(), 1);

    drop(held);
  }

  #[test]
  fn inert_watcher_accepts_watch_without_tracking() {
    let watcher = RefWatcher::inert();

    let anything: Arc<dyn Any + Send + Sync> = Arc::new(42_u32);
    watcher.watch(Arc::downgrade(&anything), "app::Ignored");

    assert!(watcher.is_inert());
    assert_eq!(watcher.retained_count(), 0);
  }

  #[test]
  fn watching_many_references_keys_them_independently() {
    let (watcher, listener, _dir) = test_watcher(ExcludedRefs::none(), false);

    let first: Arc<dyn Any + Send + Sync> = Arc::new(String::from("one"));
    let second = Arc::new(String::from("two"));
    let second_handle = Arc::downgrade(&second);
    drop(second);

    watcher.watch(Arc::downgrade(&first), "app::One");
    watcher.watch(second_handle, "app::Two");

    assert!(wait_for(|| listener.count() == 1 && watcher.retained_count() == 0));

    let dumps = listener.dumps.lock().expect("dumps");
    assert_eq!(dumps[0].name, "app::One");

    drop(first);
  }
}
