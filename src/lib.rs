//! Process-wide reference watcher.
//!
//! The host registers objects it expects to be reclaimed shortly; any of
//! them still reachable after a grace period is captured in a heap snapshot
//! on disk so the retention can be diagnosed offline. A builder assembles
//! the watcher with host-appropriate defaults and installs it into
//! process-wide state exactly once, on the host's designated main thread.

mod builder;
mod debugger;
mod dumper;
mod excluded;
mod executor;
mod host;
mod install;
mod leak_dir;
mod lifecycle;
mod listener;
mod watcher;

use {
  log::debug,
  serde::{Serialize, Serializer, ser::SerializeStruct},
  std::{
    fmt::{self, Display, Formatter},
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::Arc,
    time::SystemTime,
  },
  sysinfo::System,
};

pub use {
  builder::{ConfigError, InstallError, RefWatcherBuilder},
  debugger::{DebuggerControl, SystemDebuggerControl},
  dumper::{
    DumpError, FileHeapDumper, HeapDumper, HeapSnapshot, MemoryStats,
    NoopHeapDumper, RetainedRecord,
  },
  excluded::{ExcludedRefs, ExcludedRefsBuilder},
  executor::{
    DEFAULT_WATCH_DELAY_MILLIS, DeferredWatchExecutor, NoopWatchExecutor,
    Retry, Retryable, WatchExecutor,
  },
  host::{ANALYZER_ENV, Host, ProcessHost},
  install::{installed_directory_provider, installed_watcher},
  leak_dir::{
    DEFAULT_MAX_STORED_HEAP_DUMPS, DefaultLeakDirectoryProvider,
    HEAP_DUMP_SUFFIX, LeakDirectoryProvider,
  },
  lifecycle::{
    LifecycleBus, LifecycleEvents, LifecycleSubscriber, ScopeEvent,
    install_scope_watcher,
  },
  listener::{
    AnalysisService, DisplayService, HeapDump, HeapDumpListener,
    NoopHeapDumpListener, ServiceHeapDumpListener,
  },
  watcher::RefWatcher,
};
