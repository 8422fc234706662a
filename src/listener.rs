//! Delivery of completed heap dumps to the analysis sink.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};

/// A completed heap dump, ready for offline analysis.
#[derive(Clone, Debug)]
pub struct HeapDump {
  pub dump_duration: Duration,
  pub file: PathBuf,
  pub key: u64,
  pub name: String,
  pub watch_duration: Duration,
}

/// Receives completed heap dumps from the watcher.
pub trait HeapDumpListener: Send + Sync {
  fn on_heap_dump(&self, dump: HeapDump);
}

/// Consumes heap dumps on behalf of the analysis pipeline.
pub trait AnalysisService: Send + Sync {
  fn analyze(&self, dump: HeapDump);
}

/// Default analysis sink: records where the dump landed so an operator can
/// pick it up.
#[derive(Debug, Default)]
pub struct DisplayService;

impl AnalysisService for DisplayService {
  fn analyze(&self, dump: HeapDump) {
    info!(
      "heap dump for {} ready at {} (watched {:?}, dumped in {:?})",
      dump.name,
      dump.file.display(),
      dump.watch_duration,
      dump.dump_duration,
    );
  }
}

/// Listener that hands dumps to an analysis service on a dedicated thread,
/// keeping the watcher's executor free.
pub struct ServiceHeapDumpListener {
  sender: Mutex<mpsc::Sender<HeapDump>>,
}

impl ServiceHeapDumpListener {
  #[must_use]
  pub fn new(service: Arc<dyn AnalysisService>) -> Self {
    let (sender, receiver) = mpsc::channel::<HeapDump>();

    let spawned = thread::Builder::new()
      .name("refwatch-analysis".into())
      .spawn(move || {
        while let Ok(dump) = receiver.recv() {
          service.analyze(dump);
        }
      });

    if let Err(err) = spawned {
      warn!("failed to spawn analysis dispatch thread: {err}");
    }

    Self {
      sender: Mutex::new(sender),
    }
  }
}

impl HeapDumpListener for ServiceHeapDumpListener {
  fn on_heap_dump(&self, dump: HeapDump) {
    let sender = match self.sender.lock() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    };

    if sender.send(dump).is_err() {
      warn!("analysis service is gone; dropping heap dump");
    }
  }
}

/// Listener for the inert watcher; discards everything.
#[derive(Debug, Default)]
pub struct NoopHeapDumpListener;

impl HeapDumpListener for NoopHeapDumpListener {
  fn on_heap_dump(&self, _dump: HeapDump) {}
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Instant;

  #[derive(Default)]
  struct CollectingService {
    received: Mutex<Vec<HeapDump>>,
  }

  impl AnalysisService for CollectingService {
    fn analyze(&self, dump: HeapDump) {
      self.received.lock().expect("received").push(dump);
    }
  }

  fn sample_dump() -> HeapDump {
    HeapDump {
      dump_duration: Duration::from_millis(12),
      file: PathBuf::from("/tmp/refwatch-0.heapdump.json"),
      key: 7,
      name: "app::DetailPane".into(),
      watch_duration: Duration::from_secs(5),
    }
  }

  #[test]
  fn forwards_dumps_to_the_service() {
    let service = Arc::new(CollectingService::default());
    let listener = ServiceHeapDumpListener::new(service.clone());

    listener.on_heap_dump(sample_dump());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
      let received = service.received.lock().expect("received");
      if received.len() == 1 {
        assert_eq!(received[0].name, "app::DetailPane");
        break;
      }
      drop(received);
      assert!(Instant::now() < deadline, "dump never reached the service");
      thread::sleep(Duration::from_millis(10));
    }
  }
}
