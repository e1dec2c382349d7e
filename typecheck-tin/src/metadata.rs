//! Pre-type-check package descriptions, supplied by an external loader.
//!
//! Metadata is immutable within a snapshot: if the loader learns something
//! new, a new snapshot must be created. The graph keeps a
//! reverse index from file URI to owning packages, which is how the open
//! set is derived from overlays when resolving the shared import graph.

use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::api::{ImportPath, PackageId, PackagePath, Uri};
use crate::error::HostError;

/// Word size and maximum alignment used by the target, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sizes {
  pub word_size: i64,
  pub max_align: i64,
}

impl Default for Sizes {
  fn default() -> Sizes {
    Sizes {
      word_size: 8,
      max_align: 8,
    }
  }
}

/// Module information attached to a package, when the workspace is in
/// module mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleInfo {
  pub path: String,
  /// Language version declared by the module, e.g. `"1.4"`. Validated
  /// before being handed to the checker.
  pub lang_version: Option<String>,
}

/// Description of one package: identity, files, and dependencies.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
  pub id: PackageId,
  pub name: String,
  pub pkg_path: PackagePath,
  /// All source files of the package, including ones that are not handed
  /// to the checker. Overlaps `compiled_files`.
  pub files: Vec<Uri>,
  /// Files presented to the type checker.
  pub compiled_files: Vec<Uri>,
  pub sizes: Sizes,
  pub module: Option<ModuleInfo>,
  pub deps_by_import_path: BTreeMap<ImportPath, PackageId>,
  pub deps_by_pkg_path: BTreeMap<PackagePath, PackageId>,
  /// Loader-reported dependency errors (e.g. import cycles), already
  /// stringified. Carried for surfacing, never interpreted.
  pub dep_errors: Vec<String>,
  /// Paths the loader could not resolve to any package.
  pub missing_deps: BTreeSet<PackagePath>,
}

/// Immutable per-snapshot view of all package metadata.
#[derive(Clone, Debug, Default)]
pub struct MetadataGraph {
  packages: AHashMap<PackageId, Arc<Metadata>>,
  ids_by_uri: AHashMap<Uri, Vec<PackageId>>,
}

impl MetadataGraph {
  pub fn new(packages: impl IntoIterator<Item = Metadata>) -> MetadataGraph {
    let mut graph = MetadataGraph::default();
    for metadata in packages {
      let metadata = Arc::new(metadata);
      for uri in metadata.files.iter().chain(&metadata.compiled_files) {
        let ids = graph.ids_by_uri.entry(uri.clone()).or_default();
        if !ids.contains(&metadata.id) {
          ids.push(metadata.id.clone());
        }
      }
      graph.packages.insert(metadata.id.clone(), metadata);
    }
    for ids in graph.ids_by_uri.values_mut() {
      ids.sort();
    }
    graph
  }

  pub fn get(&self, id: &PackageId) -> Option<&Arc<Metadata>> {
    self.packages.get(id)
  }

  /// Packages containing the given file.
  pub fn ids_for_uri(&self, uri: &Uri) -> &[PackageId] {
    self.ids_by_uri.get(uri).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&PackageId, &Arc<Metadata>)> {
    self.packages.iter()
  }
}

/// External workspace loader; invoked by the snapshot before any type
/// check. Loading is expected to be expensive, so the snapshot memoizes
/// the result.
pub trait MetadataLoader: Send + Sync {
  fn load(&self) -> Result<MetadataGraph, HostError>;
}

/// Loader returning a pre-built graph; the common case for tests and for
/// sessions that load metadata eagerly.
pub struct StaticMetadata(pub MetadataGraph);

impl MetadataLoader for StaticMetadata {
  fn load(&self) -> Result<MetadataGraph, HostError> {
    Ok(self.0.clone())
  }
}
