//! Auto-watching of host scopes as they are torn down.

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use crate::host::Host;
use crate::watcher::RefWatcher;

/// A scope-teardown notification from the host.
#[derive(Clone, Debug)]
pub enum ScopeEvent {
  /// The host finished destroying a scope; `handle` is expected to stop
  /// upgrading once the host releases its last reference.
  Destroyed {
    handle: Weak<dyn Any + Send + Sync>,
    name: String,
  },
}

pub type LifecycleSubscriber = Arc<dyn Fn(&ScopeEvent) + Send + Sync>;

/// Lifecycle notifications a host may expose.
pub trait LifecycleEvents: Send + Sync {
  fn subscribe(&self, subscriber: LifecycleSubscriber);
}

/// In-process event bus hosts publish scope teardown into.
#[derive(Default)]
pub struct LifecycleBus {
  subscribers: Mutex<Vec<LifecycleSubscriber>>,
}

impl LifecycleBus {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn publish(&self, event: &ScopeEvent) {
    let subscribers = self.snapshot_subscribers();
    for subscriber in subscribers {
      subscriber(event);
    }
  }

  fn snapshot_subscribers(&self) -> Vec<LifecycleSubscriber> {
    match self.subscribers.lock() {
      Ok(guard) => guard.clone(),
      Err(err) => err.into_inner().clone(),
    }
  }

  #[must_use]
  pub fn subscriber_count(&self) -> usize {
    match self.subscribers.lock() {
      Ok(guard) => guard.len(),
      Err(err) => err.into_inner().len(),
    }
  }
}

impl std::fmt::Debug for LifecycleBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LifecycleBus")
      .field("subscribers", &self.subscriber_count())
      .finish()
  }
}

impl LifecycleEvents for LifecycleBus {
  fn subscribe(&self, subscriber: LifecycleSubscriber) {
    match self.subscribers.lock() {
      Ok(mut guard) => guard.push(subscriber),
      Err(err) => err.into_inner().push(subscriber),
    }
  }
}

/// Subscribe `watcher` to the host's scope-destruction events so destroyed
/// scopes are tracked automatically.
///
/// Returns whether a subscription was registered; hosts without the
/// lifecycle capability make this a no-op.
pub fn install_scope_watcher(host: &dyn Host, watcher: &RefWatcher) -> bool {
  let Some(events) = host.lifecycle() else {
    debug!("host exposes no lifecycle events; skipping auto-watch");
    return false;
  };

  let watcher = watcher.clone();

  events.subscribe(Arc::new(move |event: &ScopeEvent| {
    let ScopeEvent::Destroyed { handle, name } = event;
    watcher.watch(Weak::clone(handle), name.clone());
  }));

  true
}
