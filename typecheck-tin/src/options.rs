use serde::{Deserialize, Serialize};

/// Session options influencing type checking and diagnostics.
///
/// Everything here that can change observable output is folded into the
/// package key, so two sessions with different options never share cached
/// results by accident.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
  /// Maximum number of concurrent CPU-bound checks. Zero means "use the
  /// machine's available parallelism".
  pub parallelism: usize,
  /// Whether the client supports related-information on diagnostics.
  /// Controls how secondary type errors are worded.
  pub related_information: bool,
  /// Base URL used when diagnostics link to documentation.
  pub link_target: String,
  /// Whether the workspace is in module mode; changes the wording of
  /// missing-package errors.
  pub module_mode: bool,
  /// Keep the resolved import graph alive across snapshots. Turning this
  /// off trades latency for lower peak memory.
  pub preserve_import_graph: bool,
}

impl Default for CheckOptions {
  fn default() -> CheckOptions {
    CheckOptions {
      parallelism: 0,
      related_information: false,
      link_target: String::new(),
      module_mode: true,
      preserve_import_graph: true,
    }
  }
}

impl CheckOptions {
  pub(crate) fn effective_parallelism(&self) -> usize {
    if self.parallelism > 0 {
      self.parallelism
    } else {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    }
  }
}
