//! Process-wide discovery slots for the installed watcher.
//!
//! Both slots are published together, exactly once, by the builder; they
//! are never cleared for the lifetime of the process.

use std::sync::{Arc, OnceLock};

use crate::leak_dir::LeakDirectoryProvider;
use crate::watcher::RefWatcher;

pub(crate) struct Installed {
  pub directory_provider: Arc<dyn LeakDirectoryProvider>,
  pub watcher: RefWatcher,
}

static INSTALLED: OnceLock<Installed> = OnceLock::new();

/// The directory provider published at install time, for peripheral
/// subsystems that need to locate heap dumps.
#[must_use]
pub fn installed_directory_provider() -> Option<Arc<dyn LeakDirectoryProvider>> {
  INSTALLED
    .get()
    .map(|installed| Arc::clone(&installed.directory_provider))
}

/// The process-wide watcher, once installed.
#[must_use]
pub fn installed_watcher() -> Option<&'static RefWatcher> {
  INSTALLED.get().map(|installed| &installed.watcher)
}

pub(crate) fn is_installed() -> bool {
  INSTALLED.get().is_some()
}

pub(crate) fn publish(installed: Installed) -> bool {
  INSTALLED.set(installed).is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{InstallError, RefWatcherBuilder};
  use crate::host::ProcessHost;
  use crate::lifecycle::LifecycleBus;
  use serial_test::serial;
  use std::thread;
  use std::time::Duration;

  #[test]
  #[serial]
  fn install_is_single_use_and_main_thread_gated() {
    let dir = tempfile::tempdir().expect("tempdir");

    // A host whose designated main thread is not this test thread.
    let foreign_base = dir.path().to_path_buf();
    let foreign_host = thread::spawn(move || {
      Arc::new(ProcessHost::new(foreign_base).analyzer_process(false))
    })
    .join()
    .expect("host thread");

    let mut rejected = RefWatcherBuilder::new(foreign_host);
    let err = rejected
      .build_and_install()
      .expect_err("off-main-thread install must fail");

    match &err {
      InstallError::NotMainThread { thread } => {
        assert!(!thread.is_empty());
        assert!(err.to_string().contains(thread));
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(installed_watcher().is_none());
    assert!(installed_directory_provider().is_none());

    // Happy path on the designated main thread.
    let host = Arc::new(
      ProcessHost::new(dir.path().to_path_buf()).analyzer_process(false),
    );
    let mut builder = RefWatcherBuilder::new(host.clone());
    builder.watch_delay(Duration::from_millis(250));

    let watcher = builder.build_and_install().expect("install");
    assert!(!watcher.is_inert());

    let published = installed_watcher().expect("watcher published");
    assert!(watcher.shares_inner(published));
    assert!(installed_directory_provider().is_some());
    assert_eq!(
      host.lifecycle_bus().map(LifecycleBus::subscriber_count),
      Some(1)
    );

    // A second install, from any builder, fails with the fixed single-use
    // message and leaves the first watcher published.
    let mut second = RefWatcherBuilder::new(Arc::new(
      ProcessHost::new(dir.path().to_path_buf()).analyzer_process(false),
    ));
    let err = second
      .build_and_install()
      .expect_err("second install must fail");

    assert!(matches!(err, InstallError::AlreadyInstalled));
    assert!(err.to_string().contains("once"));
    assert!(
      installed_watcher()
        .expect("still published")
        .shares_inner(&watcher)
    );
  }
}
