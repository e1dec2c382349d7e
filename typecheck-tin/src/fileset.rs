//! Global position space for a type-checking batch.
//!
//! Every parsed file is assigned a disjoint base offset so that token
//! positions are globally unique within a batch, which lets side tables
//! refer to locations as plain integers. The set is append-only; cloning
//! preserves existing bases, which is how an import graph's positions
//! survive into the batches of later snapshots.

use parking_lot::Mutex;

use crate::api::Uri;

/// Base reserved at the front of every fresh file set so position zero is
/// never a valid token position.
pub(crate) const RESERVED_BASE: u64 = 1;

#[derive(Clone, Debug)]
pub struct FileSpan {
  pub uri: Uri,
  pub base: u64,
  pub len: u32,
}

#[derive(Debug)]
struct FileSetInner {
  files: Vec<FileSpan>,
  next_base: u64,
}

/// Append-only registry of file position ranges.
#[derive(Debug)]
pub struct FileSet {
  inner: Mutex<FileSetInner>,
}

impl FileSet {
  pub fn with_base(base: u64) -> FileSet {
    FileSet {
      inner: Mutex::new(FileSetInner {
        files: Vec::new(),
        next_base: base.max(RESERVED_BASE),
      }),
    }
  }

  /// Register a file of `len` bytes and return its base position. Bases
  /// are disjoint: the next file starts at `base + len + 1`.
  pub fn add(&self, uri: Uri, len: u32) -> u64 {
    let mut inner = self.inner.lock();
    let base = inner.next_base;
    inner.next_base = base + u64::from(len) + 1;
    inner.files.push(FileSpan { uri, base, len });
    base
  }

  /// Resolve a global position to `(uri, offset-in-file)`.
  pub fn resolve(&self, pos: u64) -> Option<(Uri, u32)> {
    let inner = self.inner.lock();
    let idx = inner
      .files
      .partition_point(|span| span.base <= pos)
      .checked_sub(1)?;
    let span = &inner.files[idx];
    if pos > span.base + u64::from(span.len) {
      return None;
    }
    Some((span.uri.clone(), (pos - span.base) as u32))
  }

  pub fn len(&self) -> usize {
    self.inner.lock().files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().files.is_empty()
  }

  /// Deep copy preserving every existing base. Batches never share a live
  /// file set: they clone the import graph's set so appends stay private.
  pub fn clone_set(&self) -> FileSet {
    let inner = self.inner.lock();
    FileSet {
      inner: Mutex::new(FileSetInner {
        files: inner.files.clone(),
        next_base: inner.next_base,
      }),
    }
  }
}

impl Default for FileSet {
  fn default() -> FileSet {
    FileSet::with_base(RESERVED_BASE)
  }
}
