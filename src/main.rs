use {
  refwatch::{
    LeakDirectoryProvider, ProcessHost, RefWatcherBuilder, ScopeEvent,
    installed_directory_provider,
  },
  std::{any::Any, sync::Arc, thread, time::Duration},
};

fn main() {
  env_logger::init();

  let host =
    Arc::new(ProcessHost::new(std::env::temp_dir().join("refwatch-demo")));

  let mut builder = RefWatcherBuilder::new(host.clone());
  builder.watch_delay(Duration::from_millis(500));

  let watcher = match builder.build_and_install() {
    Ok(watcher) => watcher,
    Err(err) => {
      eprintln!("install failed: {err}");
      return;
    }
  };

  // A reference that is reclaimed in time never produces a dump.
  let short_lived: Arc<dyn Any + Send + Sync> =
    Arc::new(String::from("transient view"));
  watcher.watch(Arc::downgrade(&short_lived), "demo::TransientView");
  drop(short_lived);

  // Something is still holding this scope when the host tears it down.
  let leaked: Arc<dyn Any + Send + Sync> = Arc::new(vec![0_u8; 1024]);

  if let Some(bus) = host.lifecycle_bus() {
    bus.publish(&ScopeEvent::Destroyed {
      handle: Arc::downgrade(&leaked),
      name: "demo::LeakyScope".into(),
    });
  }

  thread::sleep(Duration::from_secs(2));

  println!("=== refwatch demo ===");
  println!("references still tracked: {}", watcher.retained_count());

  if let Some(provider) = installed_directory_provider() {
    println!("heap dumps land in {}", provider.leak_directory().display());
  }

  drop(leaked);
}
