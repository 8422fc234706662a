//! Static allow-list of host references that are known to outlive their
//! scope and should never trigger a heap dump.

#[derive(Clone, Debug)]
enum Matcher {
  Exact(String),
  Prefix(String),
}

impl Matcher {
  fn matches(&self, name: &str) -> bool {
    match self {
      Self::Exact(exact) => name == exact,
      Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
    }
  }
}

#[derive(Clone, Debug)]
struct ExcludedEntry {
  matcher: Matcher,
  reason: String,
}

/// Immutable set of reference names the watcher ignores.
#[derive(Clone, Debug, Default)]
pub struct ExcludedRefs {
  entries: Vec<ExcludedEntry>,
}

impl ExcludedRefs {
  /// The curated set of host-framework references that are known to stay
  /// reachable past scope teardown.
  #[must_use]
  pub fn app_defaults() -> Self {
    Self::builder()
      .named(
        "host::Clipboard",
        "the clipboard service retains the last copied payload until the next copy",
      )
      .named(
        "host::SpellCheckerSession",
        "the spell checker keeps its session alive across focus changes",
      )
      .prefixed(
        "host::static::",
        "process-lived host singletons are only reclaimed at exit",
      )
      .build()
  }

  #[must_use]
  pub fn builder() -> ExcludedRefsBuilder {
    ExcludedRefsBuilder::default()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns the documented reason when `name` is excluded.
  #[must_use]
  pub fn match_reason(&self, name: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|entry| entry.matcher.matches(name))
      .map(|entry| entry.reason.as_str())
  }

  /// An exclusion set that matches nothing.
  #[must_use]
  pub fn none() -> Self {
    Self::default()
  }
}

#[derive(Debug, Default)]
pub struct ExcludedRefsBuilder {
  entries: Vec<ExcludedEntry>,
}

impl ExcludedRefsBuilder {
  #[must_use]
  pub fn build(self) -> ExcludedRefs {
    ExcludedRefs {
      entries: self.entries,
    }
  }

  /// Exclude references registered under exactly `name`.
  #[must_use]
  pub fn named(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
    self.entries.push(ExcludedEntry {
      matcher: Matcher::Exact(name.into()),
      reason: reason.into(),
    });
    self
  }

  /// Exclude every reference whose registered name starts with `prefix`.
  #[must_use]
  pub fn prefixed(
    mut self,
    prefix: impl Into<String>,
    reason: impl Into<String>,
  ) -> Self {
    self.entries.push(ExcludedEntry {
      matcher: Matcher::Prefix(prefix.into()),
      reason: reason.into(),
    });
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_exact_names() {
    let excluded = ExcludedRefs::builder()
      .named("host::Clipboard", "known leak")
      .build();

    assert_eq!(excluded.match_reason("host::Clipboard"), Some("known leak"));
    assert_eq!(excluded.match_reason("host::ClipboardMonitor"), None);
  }

  #[test]
  fn matches_prefixes() {
    let excluded = ExcludedRefs::builder()
      .prefixed("host::static::", "process-lived")
      .build();

    assert!(excluded.match_reason("host::static::FontCache").is_some());
    assert!(excluded.match_reason("app::FontCache").is_none());
  }

  #[test]
  fn empty_set_matches_nothing() {
    assert!(ExcludedRefs::none().match_reason("anything").is_none());
  }

  #[test]
  fn app_defaults_are_populated() {
    let defaults = ExcludedRefs::app_defaults();
    assert!(!defaults.is_empty());
    assert!(defaults.match_reason("host::Clipboard").is_some());
  }
}
