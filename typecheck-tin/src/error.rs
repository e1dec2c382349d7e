use thiserror::Error;

use crate::api::{PackageId, PackagePath};

/// Error returned by an external collaborator (file source, metadata
/// loader, export decoder).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
  pub(crate) message: String,
}

impl HostError {
  /// Create a new host error with the given message.
  pub fn new(message: impl Into<String>) -> HostError {
    HostError {
      message: message.into(),
    }
  }
}

/// Fatal, unrecoverable failure of a type-checking operation.
///
/// Type errors and parse errors in a package are not fatal: they are
/// reified into diagnostics on the returned package. Only cancellation,
/// missing metadata, and systemic I/O failures surface through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
  #[error("operation cancelled")]
  Cancelled,
  #[error(transparent)]
  Host(#[from] HostError),
  #[error("no metadata for {0}")]
  NoMetadata(PackageId),
  #[error("stale metadata for {0}")]
  StaleMetadata(PackageId),
  #[error("no parsed files for package {0}")]
  NoParsedFiles(PackagePath),
  #[error("import failed for {pkg}: {message}")]
  Import { pkg: PackageId, message: String },
  #[error("internal error: {0}")]
  Ice(String),
}

impl FatalError {
  /// Whether this failure was caused by cancellation. Cancellation is
  /// never recoverable, unlike dependency failures.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, FatalError::Cancelled)
  }

  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> FatalError {
    let message = if let Some(msg) = payload.downcast_ref::<&str>() {
      msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
      msg.clone()
    } else {
      "panic".to_string()
    };
    FatalError::Ice(message)
  }
}
