//! Content-addressed blob cache for build artifacts.
//!
//! Four artifact kinds are stored, each keyed by the 256-bit package key:
//! export data, cross-references, method sets, and diagnostics. The cache
//! is fully content-addressed, with no index and no table of contents.
//! Keys encode every input, so entries never expire for correctness
//! reasons. Misses are a normal outcome; write failures are logged and
//! never fatal.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::Key;

/// Artifact classes stored in the cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArtifactKind {
  ExportData,
  Xrefs,
  MethodSets,
  Diagnostics,
}

impl ArtifactKind {
  pub const fn as_str(&self) -> &'static str {
    match self {
      ArtifactKind::ExportData => "export",
      ArtifactKind::Xrefs => "xrefs",
      ArtifactKind::MethodSets => "methodsets",
      ArtifactKind::Diagnostics => "diagnostics",
    }
  }
}

/// Opaque key→blob store.
///
/// Implementations must be safe for concurrent use. `get` returns `None`
/// both for genuine misses and for entries that failed to read; the
/// engine re-computes either way. `set` is fire-and-forget.
pub trait BlobCache: Send + Sync {
  fn get(&self, kind: ArtifactKind, key: &Key) -> Option<Vec<u8>>;
  fn set(&self, kind: ArtifactKind, key: &Key, data: &[u8]);
}

/// In-memory cache for tests and cache-less sessions.
#[derive(Default)]
pub struct MemoryBlobCache {
  entries: Mutex<AHashMap<(ArtifactKind, Key), Vec<u8>>>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl MemoryBlobCache {
  pub fn new() -> MemoryBlobCache {
    MemoryBlobCache::default()
  }

  pub fn hits(&self) -> u64 {
    self.hits.load(Ordering::SeqCst)
  }

  pub fn misses(&self) -> u64 {
    self.misses.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }
}

impl BlobCache for MemoryBlobCache {
  fn get(&self, kind: ArtifactKind, key: &Key) -> Option<Vec<u8>> {
    let found = self.entries.lock().get(&(kind, *key)).cloned();
    match &found {
      Some(_) => self.hits.fetch_add(1, Ordering::SeqCst),
      None => self.misses.fetch_add(1, Ordering::SeqCst),
    };
    found
  }

  fn set(&self, kind: ArtifactKind, key: &Key, data: &[u8]) {
    self.entries.lock().insert((kind, *key), data.to_vec());
  }
}

/// On-disk cache: `root/<version>/<kind>/<xx>/<hex>` where `xx` is the
/// first key byte, spreading entries across directories. Writes go to a
/// temporary sibling and are renamed into place, so readers never observe
/// partial blobs and concurrent writers of the same content-addressed
/// entry are harmless.
pub struct DiskBlobCache {
  root: PathBuf,
  counter: AtomicU64,
}

const DISK_CACHE_VERSION: &str = "v1";

impl DiskBlobCache {
  pub fn new(root: impl Into<PathBuf>) -> DiskBlobCache {
    DiskBlobCache {
      root: root.into().join(DISK_CACHE_VERSION),
      counter: AtomicU64::new(0),
    }
  }

  fn entry_path(&self, kind: ArtifactKind, key: &Key) -> PathBuf {
    let hex = key.to_hex();
    self
      .root
      .join(kind.as_str())
      .join(&hex[..2])
      .join(&hex[2..])
  }

  fn write_atomically(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().expect("entry path has a parent");
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
      ".tmp.{}.{}",
      std::process::id(),
      self.counter.fetch_add(1, Ordering::Relaxed)
    ));
    {
      let mut file = fs::File::create(&tmp)?;
      file.write_all(data)?;
      file.sync_all()?;
    }
    match fs::rename(&tmp, path) {
      Ok(()) => Ok(()),
      Err(err) => {
        let _ = fs::remove_file(&tmp);
        Err(err)
      }
    }
  }
}

impl BlobCache for DiskBlobCache {
  fn get(&self, kind: ArtifactKind, key: &Key) -> Option<Vec<u8>> {
    let path = self.entry_path(kind, key);
    match fs::read(&path) {
      Ok(data) => Some(data),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
      Err(err) => {
        tracing::warn!(kind = kind.as_str(), %key, error = %err, "blob read failed");
        None
      }
    }
  }

  fn set(&self, kind: ArtifactKind, key: &Key, data: &[u8]) {
    let path = self.entry_path(kind, key);
    if let Err(err) = self.write_atomically(&path, data) {
      tracing::warn!(kind = kind.as_str(), %key, error = %err, "blob write failed");
    }
  }
}
