//! An immutable view of the workspace at one instant.
//!
//! The snapshot is the unit of cache invalidation: it owns the metadata
//! graph, the package handle store, the active-package cache, the shared
//! import graph latch, and the cancellation root. Session-scoped services
//! (parse cache, blob cache, checker, file source) are shared across
//! snapshots through `Arc`s supplied at construction.

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::debug_span;

use crate::api::{Key, PackageId, Uri};
use crate::batch::{PostTypeCheck, PreTypeCheck, TypeCheckBatch};
use crate::cancel::CancelToken;
use crate::checker::{TypeChecker, TypesPackage};
use crate::error::FatalError;
use crate::filecache::BlobCache;
use crate::files::{FileHandle, FileSource};
use crate::handle::PackageHandle;
use crate::import_graph::{erase_volatile_deps, ImportGraph};
use crate::metadata::{MetadataGraph, MetadataLoader};
use crate::options::CheckOptions;
use crate::parse_cache::ParseCache;
use crate::pkg::SyntaxPackage;
use crate::sync::Latch;

/// Everything a snapshot needs at construction time.
pub struct SnapshotConfig {
  pub files: Arc<dyn FileSource>,
  /// Unsaved editor buffers, by URI. Overlays take precedence over the
  /// file source and define the open-package set.
  pub overlays: Vec<FileHandle>,
  pub loader: Arc<dyn MetadataLoader>,
  pub parse_cache: Arc<ParseCache>,
  pub checker: Arc<dyn TypeChecker>,
  pub blobs: Arc<dyn BlobCache>,
  pub options: CheckOptions,
  /// The previous snapshot's import graph, if any; reused when the
  /// non-volatile dependency keys are unchanged.
  pub prev_import_graph: Option<Arc<ImportGraph>>,
}

enum ImportGraphState {
  Unstarted,
  InFlight(Arc<Latch<Option<Arc<ImportGraph>>>>),
  Done(Option<Arc<ImportGraph>>),
}

pub(crate) struct SnapshotInner {
  files: Arc<dyn FileSource>,
  overlays: AHashMap<Uri, FileHandle>,
  loader: Arc<dyn MetadataLoader>,
  parse_cache: Arc<ParseCache>,
  checker: Arc<dyn TypeChecker>,
  blobs: Arc<dyn BlobCache>,
  options: CheckOptions,
  cancel: CancelToken,
  meta: Mutex<Option<Arc<MetadataGraph>>>,
  /// Exactly one handle per package ID.
  handles: Mutex<AHashMap<PackageId, Arc<PackageHandle>>>,
  /// Packages memoized for fast re-service of successive requests.
  active: Mutex<AHashMap<PackageId, Arc<SyntaxPackage>>>,
  import_graph: Mutex<ImportGraphState>,
  prev_import_graph: Option<Arc<ImportGraph>>,
  /// Per-snapshot memo making reads stable: one identity per URI.
  file_reads: Mutex<AHashMap<Uri, FileHandle>>,
}

/// Cheaply cloneable facade; clones share all state, including the
/// cancellation root.
#[derive(Clone)]
pub struct Snapshot {
  inner: Arc<SnapshotInner>,
}

impl Snapshot {
  pub fn new(config: SnapshotConfig) -> Snapshot {
    let overlays = config
      .overlays
      .into_iter()
      .map(|handle| (handle.uri().clone(), handle))
      .collect();
    Snapshot {
      inner: Arc::new(SnapshotInner {
        files: config.files,
        overlays,
        loader: config.loader,
        parse_cache: config.parse_cache,
        checker: config.checker,
        blobs: config.blobs,
        options: config.options,
        cancel: CancelToken::new(),
        meta: Mutex::new(None),
        handles: Mutex::new(AHashMap::new()),
        active: Mutex::new(AHashMap::new()),
        import_graph: Mutex::new(ImportGraphState::Unstarted),
        prev_import_graph: config.prev_import_graph,
        file_reads: Mutex::new(AHashMap::new()),
      }),
    }
  }

  /// Cancel all in-flight work rooted at this snapshot.
  pub fn cancel(&self) {
    self.inner.cancel.cancel();
  }

  pub(crate) fn cancel_token(&self) -> &CancelToken {
    &self.inner.cancel
  }

  pub(crate) fn options(&self) -> &CheckOptions {
    &self.inner.options
  }

  pub(crate) fn parse_cache(&self) -> &ParseCache {
    &self.inner.parse_cache
  }

  pub(crate) fn type_checker(&self) -> &dyn TypeChecker {
    self.inner.checker.as_ref()
  }

  pub(crate) fn blob_cache(&self) -> &dyn BlobCache {
    self.inner.blobs.as_ref()
  }

  pub(crate) fn blob_cache_arc(&self) -> &Arc<dyn BlobCache> {
    &self.inner.blobs
  }

  pub(crate) fn handle_store(&self) -> &Mutex<AHashMap<PackageId, Arc<PackageHandle>>> {
    &self.inner.handles
  }

  /// The metadata graph, loading it on first use.
  pub fn metadata_graph(&self) -> Result<Arc<MetadataGraph>, FatalError> {
    self.inner.cancel.check()?;
    let mut meta = self.inner.meta.lock();
    if let Some(graph) = meta.as_ref() {
      return Ok(Arc::clone(graph));
    }
    let graph = Arc::new(self.inner.loader.load()?);
    *meta = Some(Arc::clone(&graph));
    Ok(graph)
  }

  /// Unsaved buffers known to this snapshot.
  pub fn overlays(&self) -> Vec<FileHandle> {
    self.inner.overlays.values().cloned().collect()
  }

  /// Read one file. Within a snapshot, the same URI always yields the
  /// same identity; overlays win over the underlying source.
  pub fn read_file(&self, uri: &Uri) -> Result<FileHandle, FatalError> {
    self.inner.cancel.check()?;
    if let Some(overlay) = self.inner.overlays.get(uri) {
      return Ok(overlay.clone());
    }
    if let Some(handle) = self.inner.file_reads.lock().get(uri) {
      return Ok(handle.clone());
    }
    let handle = self.inner.files.read(uri)?;
    // First read wins; a concurrent read of a changing file must not
    // produce two identities within one snapshot.
    let mut reads = self.inner.file_reads.lock();
    let entry = reads.entry(uri.clone()).or_insert(handle);
    Ok(entry.clone())
  }

  pub(crate) fn read_file_handles(&self, uris: &[Uri]) -> Result<Vec<FileHandle>, FatalError> {
    uris.iter().map(|uri| self.read_file(uri)).collect()
  }

  /// The memoized package for `id`, if this snapshot has one.
  pub fn active_package(&self, id: &PackageId) -> Option<Arc<SyntaxPackage>> {
    self.inner.active.lock().get(id).cloned()
  }

  /// Memoize a freshly built package, resolving races in favor of the
  /// instance that is already memoized.
  pub(crate) fn memoize_active(&self, pkg: &Arc<SyntaxPackage>) -> Arc<SyntaxPackage> {
    let mut active = self.inner.active.lock();
    match active.get(pkg.id()) {
      Some(existing) => Arc::clone(existing),
      None => {
        active.insert(pkg.id().clone(), Arc::clone(pkg));
        Arc::clone(pkg)
      }
    }
  }

  /// Type-check the requested packages.
  ///
  /// The result always contains one entry per requested ID, in order.
  /// Type errors inside a package are not fatal; only cancellation,
  /// missing metadata, and systemic failures produce an `Err`.
  pub fn type_check(&self, ids: &[PackageId]) -> Result<Vec<Arc<SyntaxPackage>>, FatalError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let mut results: Vec<Option<Arc<SyntaxPackage>>> = vec![None; ids.len()];
    let mut need: Vec<PackageId> = Vec::new();
    let mut slots: AHashMap<PackageId, Vec<usize>> = AHashMap::new();

    // Serving from the active-package cache makes the common burst of
    // follow-up requests after an edit (hover, lenses, inlay hints)
    // almost free.
    for (i, id) in ids.iter().enumerate() {
      if let Some(pkg) = self.active_package(id) {
        results[i] = Some(pkg);
        continue;
      }
      let entry = slots.entry(id.clone()).or_default();
      if entry.is_empty() {
        need.push(id.clone());
      }
      entry.push(i);
    }

    let results = Mutex::new(results);
    let post = |i: usize, pkg: &Arc<SyntaxPackage>| {
      let memoized = self.memoize_active(pkg);
      let mut results = results.lock();
      for &slot in &slots[&need[i]] {
        results[slot] = Some(Arc::clone(&memoized));
      }
    };
    self.for_each_package(&need, None, Some(&post))?;

    let results = results.into_inner();
    results
      .into_iter()
      .map(|slot| {
        slot.ok_or_else(|| FatalError::Ice("requested package produced no result".to_string()))
      })
      .collect()
  }

  /// Pre/post-order traversal of the requested packages; the streaming
  /// entry point used by diagnostics and analysis passes that may not
  /// need full syntax for every package.
  pub fn for_each_package<'p>(
    &self,
    ids: &[PackageId],
    pre: Option<&'p PreTypeCheck<'p>>,
    post: Option<&'p PostTypeCheck<'p>>,
  ) -> Result<(), FatalError> {
    if ids.is_empty() {
      return Ok(()); // many call sites do not handle empty ids
    }
    let _span = debug_span!("for_each_package", packages = ids.len()).entered();

    let import_graph = self.shared_import_graph();
    let batch = TypeCheckBatch::new(self, import_graph.as_deref(), ids, pre, post)?;
    batch.run(&[], ids)
  }

  /// Import-only evaluation of the given packages: each is loaded from
  /// cached export data or checked without function bodies, never built
  /// into syntax. Used by import-graph resolution and by callers that
  /// need types for dependents only.
  pub fn resolve_imports(
    &self,
    ids: &[PackageId],
  ) -> Result<Vec<Arc<TypesPackage>>, FatalError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let batch = TypeCheckBatch::new(self, None, &[], None, None)?;
    batch.run(ids, &[])?;
    let mut results = batch.import_results();
    ids
      .iter()
      .map(|id| {
        results
          .remove(id)
          .unwrap_or_else(|| Err(FatalError::Ice(format!("import node {id} is not evaluated"))))
      })
      .collect()
  }

  /// The shared import graph for this snapshot, or `None` when disabled,
  /// failed, or cancelled. The first caller computes; everyone else waits
  /// on the latch.
  fn shared_import_graph(&self) -> Option<Arc<ImportGraph>> {
    if !self.inner.options.preserve_import_graph {
      return None;
    }
    let latch = {
      let mut state = self.inner.import_graph.lock();
      match &*state {
        ImportGraphState::Done(result) => return result.clone(),
        ImportGraphState::InFlight(latch) => Arc::clone(latch),
        ImportGraphState::Unstarted => {
          let latch = Latch::new(self.cancel_token());
          *state = ImportGraphState::InFlight(Arc::clone(&latch));
          // The worker owns a clone of the snapshot, so teardown waits
          // for it even if the requesting call goes away first.
          let snapshot = self.clone();
          let worker_latch = Arc::clone(&latch);
          thread::spawn(move || {
            let result = match snapshot.resolve_import_graph() {
              Ok(graph) => graph,
              Err(err) => {
                if !err.is_cancelled() {
                  tracing::error!(error = %err, "computing the shared import graph failed");
                }
                None
              }
            };
            *snapshot.inner.import_graph.lock() = ImportGraphState::Done(result.clone());
            worker_latch.complete(result);
          });
          latch
        }
      }
    };
    latch.wait(self.cancel_token()).ok().flatten()
  }

  /// Evaluate the import graph to use for this snapshot: reuse the
  /// previous snapshot's graph when the non-volatile dependency keys are
  /// unchanged, otherwise type-check a fresh one in import-only mode.
  fn resolve_import_graph(&self) -> Result<Option<Arc<ImportGraph>>, FatalError> {
    let _span = debug_span!("resolve_import_graph").entered();
    let meta = self.metadata_graph()?;

    let mut open: AHashSet<PackageId> = AHashSet::new();
    for uri in self.inner.overlays.keys() {
      for id in meta.ids_for_uri(uri) {
        open.insert(id.clone());
      }
    }

    let mut deps: BTreeMap<PackageId, Key> = BTreeMap::new();
    for id in open.iter().sorted() {
      let metadata = match meta.get(id) {
        Some(metadata) => Arc::clone(metadata),
        None => continue,
      };
      for dep in metadata.deps_by_pkg_path.values() {
        if deps.contains_key(dep) {
          continue;
        }
        match self.build_package_handle(dep) {
          Ok(handle) => {
            deps.insert(dep.clone(), handle.key());
          }
          Err(err) => {
            if self.inner.cancel.is_cancelled() {
              return Err(FatalError::Cancelled);
            }
            tracing::warn!(dep = %dep, error = %err, "skipping unbuildable import graph dep");
          }
        }
      }
    }

    // Keeping the upward cone of open packages would let every edit
    // invalidate the shared graph; erase it before comparing.
    erase_volatile_deps(&mut deps, &meta, &open);

    // Reuse iff nothing changed. Finding still-valid subgraphs would be
    // possible but is not worth it: in the common case nothing changed.
    if let Some(prev) = &self.inner.prev_import_graph {
      if prev.deps == deps {
        return Ok(Some(Arc::clone(prev)));
      }
    }

    let ids: Vec<PackageId> = deps.keys().cloned().collect();
    let batch = TypeCheckBatch::new(self, None, &[], None, None)?;
    batch.run(&ids, &[])?;

    Ok(Some(Arc::new(ImportGraph {
      fset: batch.fset.clone_set(),
      deps,
      imports: batch.import_results(),
    })))
  }

  /// The graph a successor snapshot should be constructed with: the
  /// resolved graph when this snapshot computed one, otherwise whatever
  /// was carried over.
  pub fn import_graph(&self) -> Option<Arc<ImportGraph>> {
    match &*self.inner.import_graph.lock() {
      ImportGraphState::Done(Some(graph)) => Some(Arc::clone(graph)),
      _ => self.inner.prev_import_graph.clone(),
    }
  }
}
