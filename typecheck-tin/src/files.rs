//! File identity and content access.
//!
//! A [`FileHandle`] carries everything the engine needs to both identify a
//! file (URI, content hash, version) and read it (the content itself).
//! Handles are produced by a [`FileSource`]; within one snapshot, reading
//! the same URI always yields the same identity.

use ahash::AHashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::api::Uri;
use crate::error::HostError;

/// SHA-256 digest of a file's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
  pub fn of(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(hasher.finalize().into())
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    let mut out = String::with_capacity(64);
    for byte in self.0 {
      out.push_str(&format!("{byte:02x}"));
    }
    out
  }
}

impl fmt::Debug for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ContentHash({})", self.to_hex())
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

/// Identity and contents of one file at one instant.
#[derive(Clone)]
pub struct FileHandle {
  uri: Uri,
  hash: ContentHash,
  version: i32,
  text: Arc<str>,
}

impl FileHandle {
  pub fn new(uri: Uri, text: impl Into<Arc<str>>, version: i32) -> FileHandle {
    let text = text.into();
    let hash = ContentHash::of(text.as_bytes());
    FileHandle {
      uri,
      hash,
      version,
      text,
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

  pub fn text(&self) -> &Arc<str> {
    &self.text
  }

  /// Stable identity string folded into package keys.
  pub fn identity(&self) -> String {
    format!("{} {}", self.uri, self.hash)
  }
}

impl fmt::Debug for FileHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FileHandle")
      .field("uri", &self.uri)
      .field("hash", &self.hash)
      .field("version", &self.version)
      .finish_non_exhaustive()
  }
}

/// Source of file contents for a workspace.
///
/// Implementations must be safe for concurrent use. Snapshot stability is
/// provided by the snapshot layer, which memoizes one handle per URI.
pub trait FileSource: Send + Sync {
  fn read(&self, uri: &Uri) -> Result<FileHandle, HostError>;
}

/// In-memory [`FileSource`] for tests and embedding.
#[derive(Default)]
pub struct MemoryFileSource {
  files: Mutex<AHashMap<Uri, FileHandle>>,
}

impl MemoryFileSource {
  pub fn new() -> MemoryFileSource {
    MemoryFileSource::default()
  }

  /// Insert or replace a file, bumping its version.
  pub fn insert(&self, uri: Uri, text: impl Into<Arc<str>>) {
    let mut files = self.files.lock();
    let version = files.get(&uri).map(|f| f.version() + 1).unwrap_or(0);
    files.insert(uri.clone(), FileHandle::new(uri, text, version));
  }

  pub fn remove(&self, uri: &Uri) {
    self.files.lock().remove(uri);
  }
}

impl FileSource for MemoryFileSource {
  fn read(&self, uri: &Uri) -> Result<FileHandle, HostError> {
    self
      .files
      .lock()
      .get(uri)
      .cloned()
      .ok_or_else(|| HostError::new(format!("no such file: {uri}")))
  }
}
