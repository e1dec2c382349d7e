//! Parser boundary.
//!
//! The raw parser is an external collaborator: the engine hands it file
//! contents and a mode, and gets back an opaque syntax tree plus the
//! structured facts the orchestration layer needs (import declarations,
//! parse errors, and whether the parser had to repair syntax). A
//! [`ParsedFile`] couples a shared parse result with a per-batch base in
//! the global [`FileSet`](crate::FileSet).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use diagnostics::TextRange;

use crate::api::{ImportPath, Uri};
use crate::files::{ContentHash, FileHandle};

/// How much of a file to parse.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum ParseMode {
  /// Package clause and imports only.
  Header,
  /// The whole file.
  Full,
  /// Exported declarations only.
  Exported,
}

/// A syntax error reported by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
  pub range: TextRange,
  pub message: String,
}

/// One import declaration found in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDecl {
  pub path: ImportPath,
  /// Range of the path literal, for attaching import errors.
  pub range: TextRange,
}

/// Output of the external parser for one `(content, mode)` pair. Shared
/// between files and batches through the parse cache; everything here is
/// position-relative to the file, never to a batch.
pub struct ParsedSource {
  pub text: Arc<str>,
  pub mode: ParseMode,
  pub imports: Vec<ImportDecl>,
  pub errors: Vec<ParseError>,
  /// True when the parser applied repair heuristics; type errors computed
  /// over repaired syntax are suppressed.
  pub fixed: bool,
  /// The parser's syntax tree. The engine never looks inside.
  pub ast: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for ParsedSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParsedSource")
      .field("mode", &self.mode)
      .field("imports", &self.imports)
      .field("errors", &self.errors)
      .field("fixed", &self.fixed)
      .finish_non_exhaustive()
  }
}

/// A parsed file bound to a batch: identity, shared parse result, and the
/// file's base in the batch file set.
#[derive(Clone, Debug)]
pub struct ParsedFile {
  uri: Uri,
  hash: ContentHash,
  version: i32,
  base: u64,
  source: Arc<ParsedSource>,
}

impl ParsedFile {
  pub(crate) fn new(handle: &FileHandle, base: u64, source: Arc<ParsedSource>) -> ParsedFile {
    ParsedFile {
      uri: handle.uri().clone(),
      hash: handle.hash(),
      version: handle.version(),
      base,
      source,
    }
  }

  pub fn uri(&self) -> &Uri {
    &self.uri
  }

  pub fn hash(&self) -> ContentHash {
    self.hash
  }

  pub fn version(&self) -> i32 {
    self.version
  }

  pub fn mode(&self) -> ParseMode {
    self.source.mode
  }

  pub fn text(&self) -> &Arc<str> {
    &self.source.text
  }

  pub fn imports(&self) -> &[ImportDecl] {
    &self.source.imports
  }

  pub fn errors(&self) -> &[ParseError] {
    &self.source.errors
  }

  pub fn fixed(&self) -> bool {
    self.source.fixed
  }

  /// Base of this file in the batch's global position space.
  pub fn base(&self) -> u64 {
    self.base
  }

  /// Global position of a byte offset within this file.
  pub fn pos(&self, offset: u32) -> u64 {
    self.base + u64::from(offset)
  }

  pub fn ast(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
    self.source.ast.as_ref()
  }
}

/// The external parser.
///
/// Implementations must be deterministic for a given `(text, mode)` pair:
/// the parse cache is keyed by content hash and mode, never by URI.
pub trait SourceParser: Send + Sync {
  fn parse(&self, uri: &Uri, text: Arc<str>, mode: ParseMode) -> ParsedSource;
}
