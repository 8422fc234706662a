//! Debugger detection, used to avoid flagging retentions while the process
//! is paused under a debugger.

/// Reports whether a debugger is currently attached to the process.
pub trait DebuggerControl: Send + Sync {
  fn is_debugger_attached(&self) -> bool;
}

/// Debugger probe backed by the operating system.
///
/// On Linux this reads the tracer pid from `/proc/self/status`; other
/// platforms report no debugger.
#[derive(Debug, Default)]
pub struct SystemDebuggerControl;

impl DebuggerControl for SystemDebuggerControl {
  fn is_debugger_attached(&self) -> bool {
    tracer_pid().is_some_and(|pid| pid != 0)
  }
}

#[cfg(target_os = "linux")]
fn tracer_pid() -> Option<u32> {
  let status = std::fs::read_to_string("/proc/self/status").ok()?;
  parse_tracer_pid(&status)
}

#[cfg(not(target_os = "linux"))]
fn tracer_pid() -> Option<u32> {
  None
}

#[cfg(target_os = "linux")]
fn parse_tracer_pid(status: &str) -> Option<u32> {
  status
    .lines()
    .find_map(|line| line.strip_prefix("TracerPid:"))
    .and_then(|rest| rest.trim().parse().ok())
}
