//! Shared diagnostics model for the tin language server.
//!
//! The data structures here are intentionally minimal and deterministic so
//! they can be reused across parsing, package loading, and type checking
//! without pulling in any heavy dependencies. Everything is serde-friendly
//! because diagnostics are one of the artifact kinds the server persists in
//! its content-addressed cache.
//!
//! ```
//! use diagnostics::{Diagnostic, DiagnosticSource, Span, TextRange, Uri};
//!
//! let uri = Uri::new("file:///w/a/a.tin");
//! let diag = Diagnostic::error(
//!   DiagnosticSource::TypeChecker,
//!   "undefined: frob",
//!   Span::new(uri.clone(), TextRange::new(10, 14)),
//! );
//! assert_eq!(diag.span.uri, uri);
//! assert_eq!(diag.severity, diagnostics::Severity::Error);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A URI identifying one source file, as reported by the editor or loader.
///
/// Cheap to clone and stable for the lifetime of a workspace session.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(Arc<str>);

impl Uri {
  /// Create a new URI from any owned or borrowed string.
  pub fn new(uri: impl Into<Arc<str>>) -> Self {
    Uri(uri.into())
  }

  /// Borrow the underlying string.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Uri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Uri").field(&self.0).finish()
  }
}

impl fmt::Display for Uri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for Uri {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Uri {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(Uri::new(s))
  }
}

impl<T: Into<Arc<str>>> From<T> for Uri {
  fn from(value: T) -> Self {
    Uri::new(value)
  }
}

/// A byte range in a file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextRange {
  pub start: u32,
  pub end: u32,
}

impl TextRange {
  pub const fn new(start: u32, end: u32) -> Self {
    Self { start, end }
  }

  pub const fn empty(at: u32) -> Self {
    Self { start: at, end: at }
  }

  pub fn len(&self) -> u32 {
    self.end.saturating_sub(self.start)
  }

  pub fn is_empty(&self) -> bool {
    self.start >= self.end
  }

  pub fn contains(&self, offset: u32) -> bool {
    self.start <= offset && offset < self.end
  }
}

/// A range within a specific file.
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
  pub uri: Uri,
  pub range: TextRange,
}

impl Span {
  pub fn new(uri: Uri, range: TextRange) -> Self {
    Self { uri, range }
  }
}

impl fmt::Display for Span {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}..{}", self.uri, self.range.start, self.range.end)
  }
}

/// Diagnostic severity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
  Error,
  Warning,
  Note,
  Help,
}

impl Severity {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Severity::Error => "error",
      Severity::Warning => "warning",
      Severity::Note => "note",
      Severity::Help => "help",
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The stage that produced a diagnostic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum DiagnosticSource {
  Parser,
  Loader,
  TypeChecker,
}

impl DiagnosticSource {
  pub const fn as_str(&self) -> &'static str {
    match self {
      DiagnosticSource::Parser => "parser",
      DiagnosticSource::Loader => "loader",
      DiagnosticSource::TypeChecker => "typecheck",
    }
  }
}

/// A secondary location attached to a diagnostic, in the shape editors
/// expect for related information.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Related {
  pub span: Span,
  pub message: String,
}

impl Related {
  pub fn new(span: Span, message: impl Into<String>) -> Self {
    Self {
      span,
      message: message.into(),
    }
  }
}

/// A single diagnostic.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
  pub span: Span,
  pub severity: Severity,
  pub source: DiagnosticSource,
  pub message: String,
  pub related: Vec<Related>,
}

impl Diagnostic {
  /// Construct an error-severity diagnostic.
  pub fn error(source: DiagnosticSource, message: impl Into<String>, span: Span) -> Self {
    Self {
      span,
      severity: Severity::Error,
      source,
      message: message.into(),
      related: Vec::new(),
    }
  }

  /// Construct a warning-severity diagnostic.
  pub fn warning(source: DiagnosticSource, message: impl Into<String>, span: Span) -> Self {
    Self {
      span,
      severity: Severity::Warning,
      source,
      message: message.into(),
      related: Vec::new(),
    }
  }

  /// Attach related locations, replacing any existing ones.
  pub fn with_related(mut self, related: Vec<Related>) -> Self {
    self.related = related;
    self
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}: {}", self.span, self.severity, self.message)
  }
}
