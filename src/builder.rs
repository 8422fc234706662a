//! Builder that assembles a [`RefWatcher`] with host-appropriate defaults
//! and installs it into process-wide state exactly once.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::debugger::{DebuggerControl, SystemDebuggerControl};
use crate::dumper::{FileHeapDumper, HeapDumper};
use crate::excluded::ExcludedRefs;
use crate::executor::{DeferredWatchExecutor, WatchExecutor};
use crate::host::{current_thread_label, Host};
use crate::install::{self, Installed};
use crate::leak_dir::{DefaultLeakDirectoryProvider, LeakDirectoryProvider};
use crate::lifecycle::install_scope_watcher;
use crate::listener::{
  AnalysisService, DisplayService, HeapDumpListener, ServiceHeapDumpListener,
};
use crate::watcher::RefWatcher;

/// Rejected builder configuration.
#[derive(Debug)]
pub enum ConfigError {
  InvalidMaxStoredHeapDumps(usize),
}

impl Display for ConfigError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidMaxStoredHeapDumps(value) => {
        write!(f, "max stored heap dumps must be at least 1, got {value}")
      }
    }
  }
}

impl std::error::Error for ConfigError {}

/// Rejected install attempt. The process-wide state is untouched in either
/// case.
#[derive(Debug)]
pub enum InstallError {
  AlreadyInstalled,
  NotMainThread { thread: String },
}

impl Display for InstallError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::AlreadyInstalled => {
        write!(f, "build_and_install may only be called once per process")
      }
      Self::NotMainThread { thread } => {
        write!(
          f,
          "build_and_install must run on the host main thread, not {thread}"
        )
      }
    }
  }
}

impl std::error::Error for InstallError {}

enum ExecutorChoice {
  Custom(Arc<dyn WatchExecutor>),
  DelayedMillis(u64),
}

enum ListenerChoice {
  Custom(Arc<dyn HeapDumpListener>),
  Service(Arc<dyn AnalysisService>),
}

/// Assembles a watcher from a host context plus optional overrides.
///
/// Each logical slot is last-writer-wins: `max_stored_heap_dumps` and
/// `leak_directory_provider` replace each other, as do `listener_service`
/// and `heap_dump_listener`, and `watch_delay` and `watch_executor`.
/// Collaborators left unset are resolved to host defaults when the watcher
/// is built.
///
/// The builder is confined to the host's designated main thread and is
/// consumed by a single successful [`build_and_install`]; there is no
/// reconfiguration afterwards.
///
/// [`build_and_install`]: RefWatcherBuilder::build_and_install
pub struct RefWatcherBuilder {
  debugger_control: Option<Arc<dyn DebuggerControl>>,
  directory_provider: Arc<dyn LeakDirectoryProvider>,
  excluded_refs: Option<ExcludedRefs>,
  heap_dump_listener: Option<ListenerChoice>,
  heap_dumper: Option<Arc<dyn HeapDumper>>,
  host: Arc<dyn Host>,
  watch_activities: bool,
  watch_executor: Option<ExecutorChoice>,
}

impl fmt::Debug for RefWatcherBuilder {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefWatcherBuilder")
      .field("watch_activities", &self.watch_activities)
      .finish_non_exhaustive()
  }
}

impl RefWatcherBuilder {
  /// Create the watcher without publishing it.
  ///
  /// In the analyzer process this yields an inert watcher so dump analysis
  /// can never recurse into watching itself.
  #[must_use]
  pub fn build(&self) -> RefWatcher {
    if self.host.is_analyzer_process() {
      debug!("analyzer process detected; building an inert watcher");
      return RefWatcher::inert();
    }

    let watch_executor: Arc<dyn WatchExecutor> = match &self.watch_executor {
      Some(ExecutorChoice::Custom(executor)) => Arc::clone(executor),
      Some(ExecutorChoice::DelayedMillis(millis)) => {
        Arc::new(DeferredWatchExecutor::new(Duration::from_millis(*millis)))
      }
      None => Arc::new(DeferredWatchExecutor::default()),
    };

    let heap_dumper: Arc<dyn HeapDumper> = match &self.heap_dumper {
      Some(dumper) => Arc::clone(dumper),
      None => {
        Arc::new(FileHeapDumper::new(Arc::clone(&self.directory_provider)))
      }
    };

    let listener: Arc<dyn HeapDumpListener> = match &self.heap_dump_listener {
      Some(ListenerChoice::Custom(listener)) => Arc::clone(listener),
      Some(ListenerChoice::Service(service)) => {
        Arc::new(ServiceHeapDumpListener::new(Arc::clone(service)))
      }
      None => Arc::new(ServiceHeapDumpListener::new(Arc::new(DisplayService))),
    };

    let debugger_control: Arc<dyn DebuggerControl> =
      match &self.debugger_control {
        Some(control) => Arc::clone(control),
        None => Arc::new(SystemDebuggerControl),
      };

    let excluded = self
      .excluded_refs
      .clone()
      .unwrap_or_else(ExcludedRefs::app_defaults);

    RefWatcher::new(
      debugger_control,
      excluded,
      heap_dumper,
      listener,
      watch_executor,
    )
  }

  /// Build the watcher and publish it process-wide.
  ///
  /// # Errors
  ///
  /// Fails when called off the host's designated main thread, or more than
  /// once per process. Neither failure mutates any state.
  pub fn build_and_install(&mut self) -> Result<RefWatcher, InstallError> {
    if !self.host.is_main_thread() {
      return Err(InstallError::NotMainThread {
        thread: current_thread_label(),
      });
    }

    if install::is_installed() {
      return Err(InstallError::AlreadyInstalled);
    }

    let watcher = self.build();

    if self.watch_activities && !watcher.is_inert() {
      install_scope_watcher(self.host.as_ref(), &watcher);
    }

    let published = install::publish(Installed {
      directory_provider: Arc::clone(&self.directory_provider),
      watcher: watcher.clone(),
    });

    if !published {
      return Err(InstallError::AlreadyInstalled);
    }

    Ok(watcher)
  }

  pub fn debugger_control(
    &mut self,
    control: Arc<dyn DebuggerControl>,
  ) -> &mut Self {
    self.debugger_control = Some(control);
    self
  }

  /// The directory provider currently in effect.
  #[must_use]
  pub fn directory_provider(&self) -> &Arc<dyn LeakDirectoryProvider> {
    &self.directory_provider
  }

  pub fn excluded_refs(&mut self, excluded: ExcludedRefs) -> &mut Self {
    self.excluded_refs = Some(excluded);
    self
  }

  pub fn heap_dump_listener(
    &mut self,
    listener: Arc<dyn HeapDumpListener>,
  ) -> &mut Self {
    self.heap_dump_listener = Some(ListenerChoice::Custom(listener));
    self
  }

  pub fn heap_dumper(&mut self, dumper: Arc<dyn HeapDumper>) -> &mut Self {
    self.heap_dumper = Some(dumper);
    self
  }

  /// Replace the directory policy. Overrides any earlier
  /// [`max_stored_heap_dumps`].
  ///
  /// [`max_stored_heap_dumps`]: RefWatcherBuilder::max_stored_heap_dumps
  pub fn leak_directory_provider(
    &mut self,
    provider: Arc<dyn LeakDirectoryProvider>,
  ) -> &mut Self {
    self.directory_provider = provider;
    self
  }

  /// Route completed dumps to `service`. Overrides any earlier
  /// [`heap_dump_listener`].
  ///
  /// [`heap_dump_listener`]: RefWatcherBuilder::heap_dump_listener
  pub fn listener_service(
    &mut self,
    service: Arc<dyn AnalysisService>,
  ) -> &mut Self {
    self.heap_dump_listener = Some(ListenerChoice::Service(service));
    self
  }

  /// Cap how many heap dumps are kept on disk. Overrides any earlier
  /// [`leak_directory_provider`].
  ///
  /// # Errors
  ///
  /// Rejects a cap below 1; the builder is left unchanged.
  ///
  /// [`leak_directory_provider`]: RefWatcherBuilder::leak_directory_provider
  pub fn max_stored_heap_dumps(
    &mut self,
    max_stored: usize,
  ) -> Result<&mut Self, ConfigError> {
    if max_stored < 1 {
      return Err(ConfigError::InvalidMaxStoredHeapDumps(max_stored));
    }

    self.directory_provider = Arc::new(DefaultLeakDirectoryProvider::with_max(
      self.host.leak_base_dir(),
      max_stored,
    ));

    Ok(self)
  }

  #[must_use]
  pub fn new(host: Arc<dyn Host>) -> Self {
    let directory_provider =
      Arc::new(DefaultLeakDirectoryProvider::new(host.leak_base_dir()));

    Self {
      debugger_control: None,
      directory_provider,
      excluded_refs: None,
      heap_dump_listener: None,
      heap_dumper: None,
      host,
      watch_activities: true,
      watch_executor: None,
    }
  }

  /// Whether destroyed host scopes are watched automatically. Default is
  /// true.
  pub fn watch_activities(&mut self, watch_activities: bool) -> &mut Self {
    self.watch_activities = watch_activities;
    self
  }

  /// Wait `delay` before checking whether a watched reference was
  /// reclaimed. Overrides any earlier [`watch_executor`].
  ///
  /// [`watch_executor`]: RefWatcherBuilder::watch_executor
  pub fn watch_delay(&mut self, delay: Duration) -> &mut Self {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    self.watch_executor = Some(ExecutorChoice::DelayedMillis(millis));
    self
  }

  /// Replace the executor running deferred reachability checks. Overrides
  /// any earlier [`watch_delay`].
  ///
  /// [`watch_delay`]: RefWatcherBuilder::watch_delay
  pub fn watch_executor(
    &mut self,
    executor: Arc<dyn WatchExecutor>,
  ) -> &mut Self {
    self.watch_executor = Some(ExecutorChoice::Custom(executor));
    self
  }
}
