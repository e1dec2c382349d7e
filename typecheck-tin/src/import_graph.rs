//! The snapshot-spanning import graph.
//!
//! Holding on to imports of open packages trades memory for latency:
//! across two successive snapshots that edit an open file, unchanged
//! dependencies are reused instead of re-imported. Only the downward,
//! non-volatile part of the graph is kept: packages that are open, or
//! transitively import an open package, would be invalidated by every
//! edit and are erased before comparison.

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{Key, PackageId};
use crate::checker::TypesPackage;
use crate::error::FatalError;
use crate::fileset::FileSet;
use crate::metadata::MetadataGraph;

/// Selected results of one import-only type-checking pass, reusable by
/// the batches of later snapshots.
pub struct ImportGraph {
  /// File set used while type checking these imports; cloned into every
  /// batch that reuses the graph so positions stay stable.
  pub(crate) fset: FileSet,
  /// Keys of the graph's direct dependencies at capture time. Reuse is
  /// valid exactly when a fresh computation of this map is equal.
  pub(crate) deps: BTreeMap<PackageId, Key>,
  /// Results of type checking, including transitively reached imports.
  pub(crate) imports: AHashMap<PackageId, Result<Arc<TypesPackage>, FatalError>>,
}

impl ImportGraph {
  /// Number of cached import results.
  pub fn len(&self) -> usize {
    self.imports.len()
  }

  pub fn is_empty(&self) -> bool {
    self.imports.is_empty()
  }

  /// Whether the graph holds a result for `id`.
  pub fn contains(&self, id: &PackageId) -> bool {
    self.imports.contains_key(id)
  }
}

/// Erase the upward cone of open packages from `deps`.
///
/// A dependency is volatile if it is itself open or (transitively)
/// imports an open package. Keeping such entries would make every edit to
/// an open package invalidate the shared graph. Example: A imports B, B
/// imports C, and A and B are open; only C is worth sharing.
pub(crate) fn erase_volatile_deps(
  deps: &mut BTreeMap<PackageId, Key>,
  meta: &MetadataGraph,
  open: &AHashSet<PackageId>,
) {
  let mut memo: AHashMap<PackageId, bool> = AHashMap::new();
  let volatile: Vec<PackageId> = deps
    .keys()
    .filter(|id| is_volatile(id, meta, open, &mut memo))
    .cloned()
    .collect();
  for id in volatile {
    deps.remove(&id);
  }
}

fn is_volatile(
  id: &PackageId,
  meta: &MetadataGraph,
  open: &AHashSet<PackageId>,
  memo: &mut AHashMap<PackageId, bool>,
) -> bool {
  if let Some(&cached) = memo.get(id) {
    return cached;
  }
  // Seed false so a metadata cycle terminates; the final value overwrites.
  memo.insert(id.clone(), false);
  let volatile = open.contains(id)
    || meta.get(id).is_some_and(|metadata| {
      metadata
        .deps_by_pkg_path
        .values()
        .any(|dep| is_volatile(dep, meta, open, memo))
    });
  memo.insert(id.clone(), volatile);
  volatile
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{PackagePath, Uri};
  use crate::metadata::Metadata;

  fn metadata(id: &str, deps: &[&str]) -> Metadata {
    Metadata {
      id: PackageId::new(id),
      name: id.to_string(),
      pkg_path: PackagePath::new(id),
      files: vec![Uri::new(format!("file:///w/{id}.tin"))],
      compiled_files: vec![Uri::new(format!("file:///w/{id}.tin"))],
      deps_by_pkg_path: deps
        .iter()
        .map(|dep| (PackagePath::new(*dep), PackageId::new(*dep)))
        .collect(),
      ..Metadata::default()
    }
  }

  fn key(seed: u8) -> Key {
    Key::from_bytes([seed; 32])
  }

  #[test]
  fn open_packages_and_their_importers_are_erased() {
    // a -> b -> c, with a and b open: only c survives.
    let meta = MetadataGraph::new([
      metadata("a", &["b"]),
      metadata("b", &["c"]),
      metadata("c", &[]),
    ]);
    let open: AHashSet<PackageId> = [PackageId::new("a"), PackageId::new("b")]
      .into_iter()
      .collect();

    let mut deps = BTreeMap::new();
    deps.insert(PackageId::new("b"), key(1));
    deps.insert(PackageId::new("c"), key(2));

    erase_volatile_deps(&mut deps, &meta, &open);
    assert_eq!(deps.keys().cloned().collect::<Vec<_>>(), vec![PackageId::new("c")]);
  }

  #[test]
  fn closed_subgraphs_survive() {
    let meta = MetadataGraph::new([
      metadata("open", &["x"]),
      metadata("x", &["y"]),
      metadata("y", &[]),
    ]);
    let open: AHashSet<PackageId> = [PackageId::new("open")].into_iter().collect();

    let mut deps = BTreeMap::new();
    deps.insert(PackageId::new("x"), key(1));
    deps.insert(PackageId::new("y"), key(2));

    erase_volatile_deps(&mut deps, &meta, &open);
    assert_eq!(deps.len(), 2);
  }

  #[test]
  fn metadata_cycles_terminate() {
    let meta = MetadataGraph::new([metadata("a", &["b"]), metadata("b", &["a"])]);
    let open: AHashSet<PackageId> = AHashSet::new();

    let mut deps = BTreeMap::new();
    deps.insert(PackageId::new("a"), key(1));
    deps.insert(PackageId::new("b"), key(2));

    erase_volatile_deps(&mut deps, &meta, &open);
    assert_eq!(deps.len(), 2);
  }
}
