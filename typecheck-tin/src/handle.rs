//! Package handles: per-snapshot memoization of `(metadata, inputs, key)`.
//!
//! A handle captures everything needed to type-check one package, plus the
//! content-addressed key derived from it. Handles are built recursively
//! (dependencies first) and memoized in the snapshot's handle store with a
//! double-checked insert, so concurrent builders converge on a single
//! instance per `(snapshot, id)` without serializing all handle builds.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{ImportPath, PackageId, PackagePath};
use crate::error::FatalError;
use crate::files::FileHandle;
use crate::key::compute_package_key;
use crate::metadata::{Metadata, Sizes};
use crate::snapshot::Snapshot;
use crate::Key;

/// Pure inputs to one package build. Equal inputs produce equal keys and
/// therefore reusable results.
#[derive(Clone)]
pub struct TypeCheckInputs {
  pub id: PackageId,
  pub name: String,
  pub pkg_path: PackagePath,
  /// Files presented to the checker.
  pub compiled_files: Vec<FileHandle>,
  /// All package files; parsed for IDE features but not checked.
  pub extra_files: Vec<FileHandle>,
  pub sizes: Sizes,
  /// Raw language version from the module, hashed as-is and validated
  /// only when building the checker configuration.
  pub lang_version: Option<String>,
  pub deps_by_import_path: BTreeMap<ImportPath, PackageId>,
  /// Handles of direct dependencies. A dependency that failed to produce
  /// a handle is absent; the missing import surfaces as a type error in
  /// context rather than failing this package's build.
  pub deps: BTreeMap<PackageId, Arc<PackageHandle>>,
  pub related_information: bool,
  pub link_target: String,
  pub module_mode: bool,
}

/// Immutable handle for one package within one snapshot.
pub struct PackageHandle {
  metadata: Arc<Metadata>,
  inputs: TypeCheckInputs,
  key: Key,
}

impl PackageHandle {
  pub(crate) fn new(metadata: Arc<Metadata>, inputs: TypeCheckInputs, key: Key) -> PackageHandle {
    PackageHandle {
      metadata,
      inputs,
      key,
    }
  }

  pub fn id(&self) -> &PackageId {
    &self.metadata.id
  }

  pub fn metadata(&self) -> &Arc<Metadata> {
    &self.metadata
  }

  pub fn inputs(&self) -> &TypeCheckInputs {
    &self.inputs
  }

  pub fn key(&self) -> Key {
    self.key
  }
}

impl Snapshot {
  /// Build (or fetch) the package handle for `id`.
  ///
  /// Assumes the metadata graph already describes `id`; the caller is
  /// responsible for reloading metadata when it does not.
  pub fn build_package_handle(&self, id: &PackageId) -> Result<Arc<PackageHandle>, FatalError> {
    let meta = self.metadata_graph()?;
    let metadata = match meta.get(id) {
      Some(metadata) => Arc::clone(metadata),
      None => return Err(FatalError::NoMetadata(id.clone())),
    };

    if let Some(handle) = self.handle_store().lock().get(id) {
      return Ok(Arc::clone(handle));
    }

    let inputs = self.type_check_inputs(&metadata)?;
    // All file reading is done; freeze the inputs into a key.
    let key = compute_package_key(&inputs);
    let handle = Arc::new(PackageHandle::new(Arc::clone(&metadata), inputs, key));

    let mut store = self.handle_store().lock();

    // The metadata graph is immutable per snapshot, so the instance we
    // captured must still be the one the graph holds.
    match meta.get(id) {
      Some(current) if Arc::ptr_eq(current, &metadata) => {}
      _ => return Err(FatalError::StaleMetadata(id.clone())),
    }

    // Another task may have populated the slot while we were hashing.
    if let Some(existing) = store.get(id) {
      return Ok(Arc::clone(existing));
    }
    store.insert(id.clone(), Arc::clone(&handle));
    Ok(handle)
  }

  fn type_check_inputs(&self, metadata: &Arc<Metadata>) -> Result<TypeCheckInputs, FatalError> {
    let mut deps = BTreeMap::new();
    for dep_id in metadata.deps_by_pkg_path.values() {
      match self.build_package_handle(dep_id) {
        Ok(handle) => {
          deps.insert(dep_id.clone(), handle);
        }
        Err(err) => {
          // One bad dependency must not prevent type-checking the
          // package; the checker reports the missing import at its
          // source location instead. Only cancellation aborts. This can
          // hide real I/O bugs, hence the loud log.
          tracing::error!(
            package = %metadata.id,
            dep = %dep_id,
            error = %err,
            "no dependency handle"
          );
          if self.cancel_token().is_cancelled() {
            return Err(FatalError::Cancelled);
          }
        }
      }
    }

    // Files were pre-read at load time, so sequential reads are cheap.
    let extra_files = self.read_file_handles(&metadata.files)?;
    let compiled_files = self.read_file_handles(&metadata.compiled_files)?;

    let lang_version = metadata
      .module
      .as_ref()
      .and_then(|module| module.lang_version.clone());

    let options = self.options();
    Ok(TypeCheckInputs {
      id: metadata.id.clone(),
      name: metadata.name.clone(),
      pkg_path: metadata.pkg_path.clone(),
      compiled_files,
      extra_files,
      sizes: metadata.sizes,
      lang_version,
      deps_by_import_path: metadata.deps_by_import_path.clone(),
      deps,
      related_information: options.related_information,
      link_target: options.link_target.clone(),
      module_mode: options.module_mode,
    })
  }
}
