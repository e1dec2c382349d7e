//! One logical type-checking operation.
//!
//! A batch may type-check many unrelated packages. It shares parsed files
//! and imports across them, deduplicates concurrent demand through
//! per-package futures, and bounds CPU-heavy work with a counting
//! semaphore. Batches are transient: constructed per call, dropped when
//! the call returns. Durable state lives in the snapshot (handles, active
//! packages) and in the blob cache (artifacts).

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::debug_span;

use crate::api::{ImportPath, PackageId, PackagePath, Uri};
use crate::checker::{
  transitive_imports, CheckConfig, ImportError, Importer, TypeError, TypesInfo, TypesPackage,
  UNSAFE_PKG,
};
use crate::diags::{expand_errors, parse_error_diagnostic, type_error_diagnostic};
use crate::error::FatalError;
use crate::filecache::ArtifactKind;
use crate::fileset::FileSet;
use crate::handle::{PackageHandle, TypeCheckInputs};
use crate::import_graph::ImportGraph;
use crate::metadata::MetadataGraph;
use crate::parse::ParseMode;
use crate::pkg::{encode_diagnostics, SyntaxPackage};
use crate::snapshot::Snapshot;
use crate::sync::{Latch, Semaphore};
use crate::methodsets::MethodSetIndex;
use crate::xrefs::XrefIndex;

/// Called after a package handle is built and before type checking.
/// Returning `false` means export data is enough; the full build is
/// skipped. May be called concurrently.
pub type PreTypeCheck<'a> = dyn Fn(usize, &Arc<PackageHandle>) -> bool + Send + Sync + 'a;

/// Called after a successful full build. May be called concurrently.
pub type PostTypeCheck<'a> = dyn Fn(usize, &Arc<SyntaxPackage>) + Send + Sync + 'a;

type ImportResult = Result<Arc<TypesPackage>, FatalError>;
type SyntaxResult = Result<Option<Arc<TypesPackage>>, FatalError>;

pub(crate) struct TypeCheckBatch<'a> {
  snapshot: &'a Snapshot,
  meta: Arc<MetadataGraph>,
  pub(crate) fset: FileSet,
  cpulimit: Semaphore,
  syntax_index: AHashMap<PackageId, usize>,
  pre: Option<&'a PreTypeCheck<'a>>,
  post: Option<&'a PostTypeCheck<'a>>,
  import_futures: Mutex<AHashMap<PackageId, Arc<Latch<ImportResult>>>>,
  syntax_futures: Mutex<AHashMap<PackageId, Arc<Latch<SyntaxResult>>>>,
}

impl<'a> TypeCheckBatch<'a> {
  /// Construct a batch, seeding the file set and import futures from a
  /// reusable import graph when one is available.
  pub(crate) fn new(
    snapshot: &'a Snapshot,
    import_graph: Option<&ImportGraph>,
    syntax_ids: &[PackageId],
    pre: Option<&'a PreTypeCheck<'a>>,
    post: Option<&'a PostTypeCheck<'a>>,
  ) -> Result<TypeCheckBatch<'a>, FatalError> {
    // Capture metadata once so the batch never locks the snapshot for it.
    let meta = snapshot.metadata_graph()?;

    let mut import_futures = AHashMap::new();
    let fset = match import_graph {
      Some(graph) => {
        // Clone the file set every time so the shared graph's positions
        // stay frozen while this batch appends its own files.
        for (id, result) in &graph.imports {
          import_futures.insert(id.clone(), Latch::ready(result.clone()));
        }
        graph.fset.clone_set()
      }
      None => FileSet::default(),
    };

    let syntax_index = syntax_ids
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();

    Ok(TypeCheckBatch {
      snapshot,
      meta,
      fset,
      cpulimit: Semaphore::new(
        snapshot.options().effective_parallelism(),
        snapshot.cancel_token(),
      ),
      syntax_index,
      pre,
      post,
      import_futures: Mutex::new(import_futures),
      syntax_futures: Mutex::new(AHashMap::new()),
    })
  }

  /// Process every requested package, returning the first fatal error.
  ///
  /// One task is started per requested package; other packages are
  /// reached recursively and evaluated only when needed.
  pub(crate) fn run(
    &self,
    import_ids: &[PackageId],
    syntax_ids: &[PackageId],
  ) -> Result<(), FatalError> {
    let results: Vec<Result<(), FatalError>> = thread::scope(|scope| {
      let mut handles = Vec::with_capacity(import_ids.len() + syntax_ids.len());
      for id in import_ids {
        handles.push(scope.spawn(move || self.get_import(id).map(|_| ())));
      }
      for (i, id) in syntax_ids.iter().enumerate() {
        handles.push(scope.spawn(move || self.handle_syntax(i, id).map(|_| ())));
      }
      handles.into_iter().map(|h| h.join().expect("batch task")).collect()
    });
    results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
  }

  /// Results of every import evaluated by this batch, for capture into a
  /// new import graph. All futures are complete once `run` has returned.
  pub(crate) fn import_results(&self) -> AHashMap<PackageId, ImportResult> {
    self
      .import_futures
      .lock()
      .iter()
      .filter_map(|(id, latch)| latch.try_get().map(|result| (id.clone(), result)))
      .collect()
  }

  /// The `TypesPackage` to use for importing `id`.
  ///
  /// This may be the result of a requested syntax build, a package decoded
  /// from cached export data, or a package checked for import only. At
  /// most one build runs per `(batch, id)`; latecomers wait on the
  /// winner's future.
  pub(crate) fn get_import(&self, id: &PackageId) -> ImportResult {
    let (latch, owner) = {
      let mut futures = self.import_futures.lock();
      match futures.get(id) {
        Some(latch) => (Arc::clone(latch), false),
        None => {
          let latch = Latch::new(self.snapshot.cancel_token());
          futures.insert(id.clone(), Arc::clone(&latch));
          (latch, true)
        }
      }
    };
    if !owner {
      return latch.wait(self.snapshot.cancel_token())?;
    }

    let value = match panic::catch_unwind(AssertUnwindSafe(|| self.import_impl(id))) {
      Ok(value) => value,
      Err(payload) => Err(FatalError::from_panic(payload)),
    };
    latch.complete(value.clone());
    value
  }

  fn import_impl(&self, id: &PackageId) -> ImportResult {
    // A requested syntax package supplies its own types, unless its pre
    // callback short-circuited the full build.
    if let Some(&index) = self.syntax_index.get(id) {
      if let Some(types) = self.handle_syntax(index, id)? {
        return Ok(types);
      }
    }

    // The sentinel package cannot be imported or type-checked.
    if id.as_str() == UNSAFE_PKG {
      return Ok(TypesPackage::unsafe_package());
    }

    let handle = self.snapshot.build_package_handle(id)?;

    if let Some(data) = self
      .snapshot
      .blob_cache()
      .get(ArtifactKind::ExportData, &handle.key())
    {
      match self.import_package(&handle, &data) {
        Ok(types) => return Ok(types),
        Err(err) if err.is_cancelled() => return Err(err),
        Err(err) => {
          // A bad cache entry is a miss, not a failure.
          tracing::warn!(package = %id, error = %err, "decoding cached export data failed");
        }
      }
    }

    // No usable export data: type-check as fast as possible.
    self.check_package_for_import(&handle)
  }

  /// Load a package from export data, resolving referenced packages
  /// through this batch.
  fn import_package(&self, handle: &Arc<PackageHandle>, data: &[u8]) -> ImportResult {
    let _span = debug_span!("import_package", package = %handle.id()).entered();

    let metadata = handle.metadata();
    let import_map = self.import_map(handle.id());
    let resolve = |path: &PackagePath| -> Result<Arc<TypesPackage>, ImportError> {
      let dep_id = import_map
        .get(path)
        .ok_or_else(|| ImportError::new(format!("missing metadata for import of \"{path}\"")))?;
      self
        .get_import(dep_id)
        .map_err(|err| ImportError::new(err.to_string()))
    };

    // Importing can be expensive and may not observe cancellation through
    // dependencies if they are already evaluated.
    self.snapshot.cancel_token().check()?;

    self
      .snapshot
      .type_checker()
      .import_shallow(&self.fset, data, &metadata.pkg_path, &resolve)
      .map_err(|err| FatalError::Import {
        pkg: handle.id().clone(),
        message: err.to_string(),
      })
  }

  /// Type-check for export only: function bodies are skipped and errors
  /// are discarded. The resulting export data is recorded asynchronously.
  fn check_package_for_import(&self, handle: &Arc<PackageHandle>) -> ImportResult {
    let _span = debug_span!("check_for_import", package = %handle.id()).entered();
    let cancel = self.snapshot.cancel_token();
    let inputs = handle.inputs();

    // Await predecessors before taking a CPU token, for the same
    // starvation reason as in the syntax path: a token holder must never
    // block on a future whose producer also needs a token.
    if let Some(err) = self.await_predecessors(handle.metadata()) {
      if err.is_cancelled() {
        return Err(err);
      }
    }
    let _permit = self.cpulimit.acquire(cancel)?;

    let files = self.snapshot.parse_cache().parse_files(
      &self.fset,
      ParseMode::Full,
      &inputs.compiled_files,
      cancel,
    )?;

    let importer = BatchImporter {
      batch: self,
      inputs,
    };
    let sink = |_: TypeError| {}; // errors are irrelevant for exporting
    let config = CheckConfig {
      pkg_path: inputs.pkg_path.clone(),
      name: inputs.name.clone(),
      sizes: inputs.sizes,
      lang_version: validated_lang_version(inputs),
      ignore_bodies: true,
      importer: &importer,
      error_sink: &sink,
    };

    // Checking is expensive and we may have seen nothing but parse-cache
    // hits on the way here.
    cancel.check()?;
    let mut info = TypesInfo::default();
    let types = self
      .snapshot
      .type_checker()
      .check(&self.fset, &config, &files, &mut info);
    // The checker runs to completion; results computed after cancellation
    // are dropped.
    cancel.check()?;

    match self.snapshot.type_checker().export_shallow(&self.fset, &types) {
      Ok(data) => self.cache_artifacts(handle.key(), vec![(ArtifactKind::ExportData, data)]),
      Err(err) => {
        tracing::warn!(package = %handle.id(), error = %err, "exporting package failed");
      }
    }
    Ok(types)
  }

  /// Handle one requested syntax package. Returns the resulting types
  /// when a full build ran, or `None` when `pre` short-circuited it.
  pub(crate) fn handle_syntax(&self, index: usize, id: &PackageId) -> SyntaxResult {
    let (latch, owner) = {
      let mut futures = self.syntax_futures.lock();
      match futures.get(id) {
        Some(latch) => (Arc::clone(latch), false),
        None => {
          let latch = Latch::new(self.snapshot.cancel_token());
          futures.insert(id.clone(), Arc::clone(&latch));
          (latch, true)
        }
      }
    };
    if !owner {
      return latch.wait(self.snapshot.cancel_token())?;
    }

    let value = match panic::catch_unwind(AssertUnwindSafe(|| self.syntax_impl(index, id))) {
      Ok(value) => value,
      Err(payload) => Err(FatalError::from_panic(payload)),
    };
    latch.complete(value.clone());
    value
  }

  fn syntax_impl(&self, index: usize, id: &PackageId) -> SyntaxResult {
    let handle = self.snapshot.build_package_handle(id)?;

    if let Some(pre) = self.pre {
      if !pre(index, &handle) {
        return Ok(None); // skip: export data is enough
      }
    }

    // One failed predecessor must not fail this package: the missing
    // import becomes a type error with a source location when the checker
    // resolves imports. Cancellation is the exception.
    if let Some(err) = self.await_predecessors(handle.metadata()) {
      if err.is_cancelled() {
        return Err(err);
      }
    }

    // Acquire the CPU token only after awaiting predecessors, to avoid
    // starving import work behind full builds.
    let _permit = self.cpulimit.acquire(self.snapshot.cancel_token())?;

    let pkg = self.check_package(&handle)?;
    if let Some(post) = self.post {
      post(index, &pkg);
    }
    Ok(Some(Arc::clone(&pkg.types)))
  }

  /// Concurrently evaluate every direct dependency, returning the first
  /// failure, if any. Some dependencies may be non-syntax packages that no
  /// batch task has started yet, hence the fan-out.
  ///
  /// Both dependency maps are covered: a CPU token holder must never be
  /// the first to demand an import, or the token ordering rule breaks.
  fn await_predecessors(&self, metadata: &crate::metadata::Metadata) -> Option<FatalError> {
    let unique: AHashSet<&PackageId> = metadata
      .deps_by_pkg_path
      .values()
      .chain(metadata.deps_by_import_path.values())
      .collect();
    let failures: Vec<FatalError> = thread::scope(|scope| {
      let handles: Vec<_> = unique
        .into_iter()
        .map(|dep| scope.spawn(move || self.get_import(dep)))
        .collect();
      handles
        .into_iter()
        .filter_map(|h| h.join().expect("predecessor task").err())
        .collect()
    });
    failures
      .iter()
      .find(|err| err.is_cancelled())
      .or_else(|| failures.first())
      .cloned()
  }

  /// Fully type-check one package, producing a [`SyntaxPackage`].
  fn check_package(&self, handle: &Arc<PackageHandle>) -> Result<Arc<SyntaxPackage>, FatalError> {
    let _span = debug_span!("check_package", package = %handle.id()).entered();
    let cancel = self.snapshot.cancel_token();
    let inputs = handle.inputs();
    let parse_cache = self.snapshot.parse_cache();

    // Both file lists are parsed: extra files are not checked, but their
    // syntax is served through the package's file accessors.
    let extra_files =
      parse_cache.parse_files(&self.fset, ParseMode::Full, &inputs.extra_files, cancel)?;
    let compiled_files =
      parse_cache.parse_files(&self.fset, ParseMode::Full, &inputs.compiled_files, cancel)?;

    let mut parse_errors: Vec<(Uri, crate::parse::ParseError)> = Vec::new();
    for file in &compiled_files {
      for error in file.errors() {
        parse_errors.push((file.uri().clone(), error.clone()));
      }
    }
    let has_fixed_files = compiled_files.iter().any(|file| file.fixed());

    let (types, info, raw_type_errors) = if inputs.pkg_path.as_str() == UNSAFE_PKG {
      // The sentinel package gets its canonical types without a check.
      (TypesPackage::unsafe_package(), TypesInfo::default(), Vec::new())
    } else {
      if compiled_files.is_empty() {
        // No files most likely means the loader failed.
        return Err(FatalError::NoParsedFiles(inputs.pkg_path.clone()));
      }

      let collected: Mutex<Vec<TypeError>> = Mutex::new(Vec::new());
      let sink = |error: TypeError| collected.lock().push(error);
      let importer = BatchImporter {
        batch: self,
        inputs,
      };
      let config = CheckConfig {
        pkg_path: inputs.pkg_path.clone(),
        name: inputs.name.clone(),
        sizes: inputs.sizes,
        lang_version: validated_lang_version(inputs),
        ignore_bodies: false,
        importer: &importer,
        error_sink: &sink,
      };

      cancel.check()?;
      let mut info = TypesInfo::default();
      let types = self
        .snapshot
        .type_checker()
        .check(&self.fset, &config, &compiled_files, &mut info);
      // The checker may have produced a pile of transient errors if we
      // were cancelled mid-run; swallow them.
      cancel.check()?;
      (types, info, collected.into_inner())
    };

    let import_map: BTreeMap<PackagePath, Arc<TypesPackage>> =
      transitive_imports(&types).into_iter().collect();
    let method_sets = MethodSetIndex::build(&inputs.pkg_path, &info);
    let xrefs = XrefIndex::build(&inputs.pkg_path, &info);

    // Files with parse errors are marked so their (likely confusing)
    // type errors are suppressed; type errors elsewhere in the package
    // still carry enough signal to show.
    let mut diagnostics = Vec::new();
    let mut unparseable: AHashSet<Uri> = AHashSet::new();
    for (uri, error) in &parse_errors {
      unparseable.insert(uri.clone());
      diagnostics.push(parse_error_diagnostic(uri, error));
    }

    let mut type_errors = Vec::new();
    if has_fixed_files {
      // Repaired syntax cannot be trusted to carry accurate locations.
      type_errors = raw_type_errors;
    } else {
      for extended in expand_errors(raw_type_errors, inputs.related_information) {
        if !unparseable.contains(&extended.primary.span.uri) {
          diagnostics.push(type_error_diagnostic(&extended));
        }
        type_errors.push(extended.primary);
      }
    }

    diagnostics.sort_by(|a, b| {
      (&a.span, &a.message).cmp(&(&b.span, &b.message))
    });

    let pkg = Arc::new(SyntaxPackage {
      metadata: Arc::clone(handle.metadata()),
      compiled_files,
      extra_files,
      parse_errors,
      type_errors,
      diagnostics,
      types,
      types_info: Arc::new(info),
      method_sets: Arc::new(method_sets),
      xrefs: Arc::new(xrefs),
      import_map,
      has_fixed_files,
    });

    let mut artifacts = vec![
      (ArtifactKind::Xrefs, pkg.xrefs.encode()),
      (ArtifactKind::MethodSets, pkg.method_sets.encode()),
      (ArtifactKind::Diagnostics, encode_diagnostics(&pkg.diagnostics)),
    ];
    if !pkg.types.is_unsafe() {
      match self
        .snapshot
        .type_checker()
        .export_shallow(&self.fset, &pkg.types)
      {
        Ok(data) => artifacts.push((ArtifactKind::ExportData, data)),
        Err(err) => {
          tracing::warn!(package = %handle.id(), error = %err, "exporting package failed");
        }
      }
    }
    self.cache_artifacts(handle.key(), artifacts);

    Ok(pkg)
  }

  /// Transitive map of package path to package ID, relative to `id`.
  fn import_map(&self, id: &PackageId) -> AHashMap<PackagePath, PackageId> {
    let mut out = AHashMap::new();
    let mut stack: Vec<PackageId> = match self.meta.get(id) {
      Some(metadata) => metadata.deps_by_pkg_path.values().cloned().collect(),
      None => Vec::new(),
    };
    while let Some(dep) = stack.pop() {
      let metadata = match self.meta.get(&dep) {
        Some(metadata) => metadata,
        None => continue,
      };
      if out.contains_key(&metadata.pkg_path) {
        continue;
      }
      out.insert(metadata.pkg_path.clone(), dep);
      stack.extend(metadata.deps_by_pkg_path.values().cloned());
    }
    out
  }

  /// Write artifacts to the blob cache without blocking the build.
  /// Failures are the cache implementation's to log; absence of an
  /// artifact only ever means recomputation.
  fn cache_artifacts(&self, key: crate::Key, artifacts: Vec<(ArtifactKind, Vec<u8>)>) {
    let blobs = Arc::clone(self.snapshot.blob_cache_arc());
    thread::spawn(move || {
      for (kind, data) in artifacts {
        blobs.set(kind, &key, &data);
      }
    });
  }
}

/// The synchronous importer handed to the external checker. Errors are
/// reported through the importer so the checker places them at the
/// import declaration.
struct BatchImporter<'b, 'a> {
  batch: &'b TypeCheckBatch<'a>,
  inputs: &'b TypeCheckInputs,
}

impl Importer for BatchImporter<'_, '_> {
  fn import(&self, path: &ImportPath) -> Result<Arc<TypesPackage>, ImportError> {
    let id = self.inputs.deps_by_import_path.get(path).ok_or_else(|| {
      // A broken import declaration often has no metadata at all.
      ImportError::new(format!("missing metadata for import of \"{path}\""))
    })?;
    let dep = self
      .inputs
      .deps
      .get(id)
      .ok_or_else(|| missing_pkg_error(path, self.inputs.module_mode))?;
    if !is_valid_import(&self.inputs.pkg_path, &dep.metadata().pkg_path) {
      return Err(ImportError::new(format!(
        "invalid use of internal package \"{path}\""
      )));
    }
    self
      .batch
      .get_import(id)
      .map_err(|err| ImportError::new(err.to_string()))
  }
}

/// Wording for a missing package varies with the workspace mode.
fn missing_pkg_error(path: &ImportPath, module_mode: bool) -> ImportError {
  if module_mode {
    ImportError::new(format!("no required module provides package \"{path}\""))
  } else {
    ImportError::new(format!("cannot find package \"{path}\" in the search path"))
  }
}

/// A package under an `internal/` segment may only be imported from
/// within the subtree rooted at the segment's parent.
pub(crate) fn is_valid_import(local: &PackagePath, imported: &PackagePath) -> bool {
  match imported.as_str().rfind("/internal/") {
    None => true,
    Some(i) => local.as_str().starts_with(&imported.as_str()[..i]),
  }
}

static LANG_VERSION: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
  regex::Regex::new(r"^([1-9][0-9]*)\.(0|[1-9][0-9]*)$").expect("version pattern compiles")
});

/// The checker rejects malformed language versions outright; dropping
/// them here keeps an unparseable module file from poisoning the config.
fn validated_lang_version(inputs: &TypeCheckInputs) -> Option<String> {
  inputs
    .lang_version
    .as_ref()
    .filter(|version| LANG_VERSION.is_match(version))
    .cloned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn internal_visibility_rule() {
    let local = PackagePath::new("example.com/a/b");
    assert!(is_valid_import(&local, &PackagePath::new("example.com/c")));
    assert!(is_valid_import(
      &local,
      &PackagePath::new("example.com/a/internal/x")
    ));
    assert!(!is_valid_import(
      &local,
      &PackagePath::new("example.com/z/internal/x")
    ));
    assert!(is_valid_import(
      &PackagePath::new("example.com/z/sub"),
      &PackagePath::new("example.com/z/internal/x")
    ));
  }

  #[test]
  fn missing_package_wording_tracks_mode() {
    let path = ImportPath::new("example.com/gone");
    assert_eq!(
      missing_pkg_error(&path, true).message,
      "no required module provides package \"example.com/gone\""
    );
    assert_eq!(
      missing_pkg_error(&path, false).message,
      "cannot find package \"example.com/gone\" in the search path"
    );
  }
}
