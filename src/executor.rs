//! Deferred execution of reachability checks.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

/// Grace period before the first reachability check, in milliseconds.
pub const DEFAULT_WATCH_DELAY_MILLIS: u64 = 5000;

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);
const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of one unit of deferred work.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Retry {
  /// The work completed; do not run it again.
  Done,
  /// The work could not complete yet and should run again after a backoff.
  Later,
}

/// A unit of work the executor may run more than once.
pub type Retryable = Box<dyn FnMut() -> Retry + Send>;

/// Schedules a deferred check, re-running it with backoff while it asks to
/// be retried.
pub trait WatchExecutor: Send + Sync {
  fn execute(&self, work: Retryable);
}

/// Executor that silently drops all work.
#[derive(Debug, Default)]
pub struct NoopWatchExecutor;

impl WatchExecutor for NoopWatchExecutor {
  fn execute(&self, _work: Retryable) {}
}

struct Job {
  due: Instant,
  wait: Duration,
  work: Retryable,
}

#[derive(Default)]
struct JobQueue {
  jobs: Vec<Job>,
  shutdown: bool,
}

#[derive(Default)]
struct ExecutorShared {
  queue: Mutex<JobQueue>,
  wake: Condvar,
}

impl ExecutorShared {
  fn lock_queue(&self) -> MutexGuard<'_, JobQueue> {
    match self.queue.lock() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }
}

/// Runs retryables on a single background thread after an initial delay,
/// doubling the wait between retries up to a cap.
pub struct DeferredWatchExecutor {
  initial_delay: Duration,
  shared: Arc<ExecutorShared>,
}

impl DeferredWatchExecutor {
  #[must_use]
  pub fn initial_delay(&self) -> Duration {
    self.initial_delay
  }

  #[must_use]
  pub fn new(initial_delay: Duration) -> Self {
    let shared = Arc::new(ExecutorShared::default());
    let worker_shared = Arc::clone(&shared);

    let spawned = thread::Builder::new()
      .name("refwatch-watch".into())
      .spawn(move || run_worker(&worker_shared));

    if let Err(err) = spawned {
      warn!("failed to spawn watch executor thread: {err}");
    }

    Self {
      initial_delay,
      shared,
    }
  }
}

impl Default for DeferredWatchExecutor {
  fn default() -> Self {
    Self::new(Duration::from_millis(DEFAULT_WATCH_DELAY_MILLIS))
  }
}

impl Drop for DeferredWatchExecutor {
  fn drop(&mut self) {
    self.shared.lock_queue().shutdown = true;
    self.shared.wake.notify_all();
  }
}

impl WatchExecutor for DeferredWatchExecutor {
  fn execute(&self, work: Retryable) {
    let mut queue = self.shared.lock_queue();
    queue.jobs.push(Job {
      due: Instant::now() + self.initial_delay,
      wait: self.initial_delay,
      work,
    });
    drop(queue);
    self.shared.wake.notify_one();
  }
}

fn next_backoff(wait: Duration) -> Duration {
  (wait * 2).clamp(MIN_RETRY_BACKOFF, MAX_RETRY_BACKOFF)
}

fn run_worker(shared: &ExecutorShared) {
  let mut queue = shared.lock_queue();

  loop {
    if queue.shutdown {
      return;
    }

    let now = Instant::now();

    if let Some(index) = queue.jobs.iter().position(|job| job.due <= now) {
      let mut job = queue.jobs.swap_remove(index);
      drop(queue);

      let outcome = (job.work)();

      queue = shared.lock_queue();

      if outcome == Retry::Later {
        job.wait = next_backoff(job.wait);
        job.due = Instant::now() + job.wait;
        queue.jobs.push(job);
      }

      continue;
    }

    let earliest = queue.jobs.iter().map(|job| job.due).min();

    queue = match earliest {
      Some(due) => {
        let timeout = due.saturating_duration_since(now);
        let (guard, _) = shared
          .wake
          .wait_timeout(queue, timeout)
          .unwrap_or_else(|err| err.into_inner());
        guard
      }
      None => shared
        .wake
        .wait(queue)
        .unwrap_or_else(|err| err.into_inner()),
    };
  }
}
