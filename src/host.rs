//! The host application's view of the process: its designated main thread,
//! whether this process is the dedicated analyzer, and where dumps may be
//! stored.

use std::env;
use std::path::PathBuf;
use std::thread::{self, ThreadId};

use crate::lifecycle::{LifecycleBus, LifecycleEvents};

/// Environment override for analyzer-process detection; any value other
/// than `0` marks the current process as the analyzer.
pub const ANALYZER_ENV: &str = "REFWATCH_ANALYZER";

const ANALYZER_SUFFIX: &str = "-analyzer";

/// Application-scoped context the watcher is built against.
pub trait Host: Send + Sync {
  /// Whether this process is the one reserved for parsing heap dumps.
  fn is_analyzer_process(&self) -> bool;

  fn is_main_thread(&self) -> bool {
    thread::current().id() == self.main_thread()
  }

  /// App-scoped storage root under which heap dumps are written.
  fn leak_base_dir(&self) -> PathBuf;

  /// Scope-destruction events, when the host exposes them.
  fn lifecycle(&self) -> Option<&dyn LifecycleEvents> {
    None
  }

  /// The single thread install-time work must run on.
  fn main_thread(&self) -> ThreadId;
}

/// Host backed by the current process. The constructing thread becomes the
/// designated main thread.
#[derive(Debug)]
pub struct ProcessHost {
  analyzer_process: bool,
  base_dir: PathBuf,
  lifecycle: Option<LifecycleBus>,
  main_thread: ThreadId,
}

impl ProcessHost {
  /// Override analyzer-process detection, mainly for embedding hosts that
  /// track their own process roles.
  #[must_use]
  pub fn analyzer_process(mut self, analyzer_process: bool) -> Self {
    self.analyzer_process = analyzer_process;
    self
  }

  /// The event bus scope teardown should be published into.
  #[must_use]
  pub fn lifecycle_bus(&self) -> Option<&LifecycleBus> {
    self.lifecycle.as_ref()
  }

  #[must_use]
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      analyzer_process: detect_analyzer_process(),
      base_dir: base_dir.into(),
      lifecycle: Some(LifecycleBus::new()),
      main_thread: thread::current().id(),
    }
  }

  /// Drop the lifecycle capability, for hosts that tear scopes down
  /// manually.
  #[must_use]
  pub fn without_lifecycle(mut self) -> Self {
    self.lifecycle = None;
    self
  }
}

impl Host for ProcessHost {
  fn is_analyzer_process(&self) -> bool {
    self.analyzer_process
  }

  fn leak_base_dir(&self) -> PathBuf {
    self.base_dir.clone()
  }

  fn lifecycle(&self) -> Option<&dyn LifecycleEvents> {
    self
      .lifecycle
      .as_ref()
      .map(|bus| bus as &dyn LifecycleEvents)
  }

  fn main_thread(&self) -> ThreadId {
    self.main_thread
  }
}

pub(crate) fn current_thread_label() -> String {
  let current = thread::current();
  match current.name() {
    Some(name) => name.to_string(),
    None => format!("{:?}", current.id()),
  }
}

fn detect_analyzer_process() -> bool {
  if let Ok(value) = env::var(ANALYZER_ENV) {
    return value != "0";
  }

  env::current_exe()
    .ok()
    .and_then(|path| {
      path
        .file_stem()
        .map(|stem| is_analyzer_name(&stem.to_string_lossy()))
    })
    .unwrap_or(false)
}

fn is_analyzer_name(name: &str) -> bool {
  name.ends_with(ANALYZER_SUFFIX)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn analyzer_names_end_with_the_suffix() {
    assert!(is_analyzer_name("refwatch-analyzer"));
    assert!(!is_analyzer_name("refwatch"));
    assert!(!is_analyzer_name("analyzer-tool"));
  }

  #[test]
  fn constructing_thread_is_the_main_thread() {
    let host = ProcessHost::new("/tmp/refwatch-test");
    assert!(host.is_main_thread());
  }

  #[test]
  fn other_threads_are_not_the_main_thread() {
    let host = Arc::new(ProcessHost::new("/tmp/refwatch-test"));
    let host_in_thread = Arc::clone(&host);

    let off_main = thread::spawn(move || host_in_thread.is_main_thread())
      .join()
      .expect("probe thread");

    assert!(!off_main);
  }

  #[test]
  fn lifecycle_capability_can_be_dropped() {
    let host = ProcessHost::new("/tmp/refwatch-test").without_lifecycle();
    assert!(host.lifecycle().is_none());
    assert!(host.lifecycle_bus().is_none());
  }
}
