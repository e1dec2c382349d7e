//! Content-addressed key computation for package builds.
//!
//! The key must be a hash of an unambiguous encoding of every input that
//! can influence observable type-check output. Every field
//! is length-prefixed and map iteration is sorted, so two equal input sets
//! always hash identically regardless of construction order. Dependencies
//! contribute their *keys*, not just their identities, which transitively
//! folds every upstream byte into this key: key equality alone guarantees
//! result reuse.

use itertools::Itertools;
use sha2::{Digest, Sha256};

use crate::api::Key;
use crate::handle::TypeCheckInputs;

struct KeyHasher {
  hasher: Sha256,
}

impl KeyHasher {
  fn new() -> KeyHasher {
    KeyHasher {
      hasher: Sha256::new(),
    }
  }

  fn str(&mut self, value: &str) {
    self.bytes(value.as_bytes());
  }

  fn bytes(&mut self, value: &[u8]) {
    self.u64(value.len() as u64);
    self.hasher.update(value);
  }

  fn u64(&mut self, value: u64) {
    self.hasher.update(value.to_le_bytes());
  }

  fn i64(&mut self, value: i64) {
    self.hasher.update(value.to_le_bytes());
  }

  fn bool(&mut self, value: bool) {
    self.hasher.update([u8::from(value)]);
  }

  fn finish(self) -> Key {
    Key::from_bytes(self.hasher.finalize().into())
  }
}

/// Compute the 256-bit key for one package build.
pub fn compute_package_key(inputs: &TypeCheckInputs) -> Key {
  let mut h = KeyHasher::new();

  // Package identifiers.
  h.str(inputs.id.as_str());
  h.str(&inputs.name);
  h.str(inputs.pkg_path.as_str());

  // Language version.
  h.str(inputs.lang_version.as_deref().unwrap_or(""));

  // Import map, sorted by import path. BTreeMap iteration is already
  // ordered; the count disambiguates adjacent sections.
  h.u64(inputs.deps_by_import_path.len() as u64);
  for (import_path, id) in &inputs.deps_by_import_path {
    h.str(import_path.as_str());
    h.str(id.as_str());
  }

  // Dependency handles in PackageId order: path and key. Missing deps are
  // absent here by construction, so their absence is part of the key.
  h.u64(inputs.deps.len() as u64);
  for id in inputs.deps.keys().sorted() {
    let dep = &inputs.deps[id];
    h.str(dep.metadata().pkg_path.as_str());
    h.bytes(dep.key().as_bytes());
  }

  // File names and contents, in metadata order.
  h.u64(inputs.compiled_files.len() as u64);
  for handle in &inputs.compiled_files {
    h.str(handle.uri().as_str());
    h.bytes(handle.hash().as_bytes());
  }
  h.u64(inputs.extra_files.len() as u64);
  for handle in &inputs.extra_files {
    h.str(handle.uri().as_str());
    h.bytes(handle.hash().as_bytes());
  }

  // Target sizes.
  h.i64(inputs.sizes.word_size);
  h.i64(inputs.sizes.max_align);

  // Diagnostic-affecting flags.
  h.bool(inputs.related_information);
  h.str(&inputs.link_target);
  h.bool(inputs.module_mode);

  h.finish()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{ImportPath, PackageId, PackagePath, Uri};
  use crate::files::FileHandle;
  use crate::handle::PackageHandle;
  use crate::metadata::{Metadata, Sizes};
  use std::collections::BTreeMap;
  use std::sync::Arc;

  fn file(uri: &str, text: &str) -> FileHandle {
    FileHandle::new(Uri::new(uri), text, 0)
  }

  fn leaf_handle(id: &str, text: &str) -> Arc<PackageHandle> {
    let metadata = Arc::new(Metadata {
      id: PackageId::new(id),
      name: "leaf".to_string(),
      pkg_path: PackagePath::new(id),
      ..Metadata::default()
    });
    let inputs = TypeCheckInputs {
      id: PackageId::new(id),
      name: "leaf".to_string(),
      pkg_path: PackagePath::new(id),
      compiled_files: vec![file("file:///leaf.tin", text)],
      extra_files: Vec::new(),
      sizes: Sizes::default(),
      lang_version: None,
      deps_by_import_path: BTreeMap::new(),
      deps: BTreeMap::new(),
      related_information: false,
      link_target: String::new(),
      module_mode: true,
    };
    let key = compute_package_key(&inputs);
    Arc::new(PackageHandle::new(metadata, inputs, key))
  }

  fn base_inputs() -> TypeCheckInputs {
    let mut deps_by_import_path = BTreeMap::new();
    deps_by_import_path.insert(ImportPath::new("x"), PackageId::new("example.com/x"));
    deps_by_import_path.insert(ImportPath::new("y"), PackageId::new("example.com/y"));
    let mut deps = BTreeMap::new();
    deps.insert(PackageId::new("example.com/x"), leaf_handle("example.com/x", "package x\n"));
    deps.insert(PackageId::new("example.com/y"), leaf_handle("example.com/y", "package y\n"));
    TypeCheckInputs {
      id: PackageId::new("example.com/a"),
      name: "a".to_string(),
      pkg_path: PackagePath::new("example.com/a"),
      compiled_files: vec![file("file:///a.tin", "package a\n")],
      extra_files: vec![file("file:///a_extra.tin", "package a\n// extra\n")],
      sizes: Sizes::default(),
      lang_version: Some("1.4".to_string()),
      deps_by_import_path,
      deps,
      related_information: true,
      link_target: "https://docs.example.com".to_string(),
      module_mode: true,
    }
  }

  #[test]
  fn key_is_stable_for_equal_inputs() {
    assert_eq!(
      compute_package_key(&base_inputs()),
      compute_package_key(&base_inputs())
    );
  }

  #[test]
  fn dependency_insertion_order_does_not_matter() {
    let forward = base_inputs();

    let mut reversed = base_inputs();
    let entries: Vec<_> = reversed.deps.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
    reversed.deps = entries.into_iter().rev().collect();
    let imports: Vec<_> = reversed
      .deps_by_import_path
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    reversed.deps_by_import_path = imports.into_iter().rev().collect();

    assert_eq!(
      compute_package_key(&forward),
      compute_package_key(&reversed)
    );
  }

  #[test]
  fn every_field_influences_the_key() {
    let base = compute_package_key(&base_inputs());

    let mut inputs = base_inputs();
    inputs.name = "b".to_string();
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.lang_version = None;
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.compiled_files = vec![file("file:///a.tin", "package a\nfn f() {}\n")];
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.extra_files.clear();
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.sizes = Sizes {
      word_size: 4,
      max_align: 4,
    };
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.related_information = false;
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.module_mode = false;
    assert_ne!(base, compute_package_key(&inputs));

    let mut inputs = base_inputs();
    inputs.deps.remove(&PackageId::new("example.com/x"));
    assert_ne!(base, compute_package_key(&inputs));
  }

  #[test]
  fn dependency_key_changes_propagate() {
    let base = compute_package_key(&base_inputs());

    let mut inputs = base_inputs();
    inputs.deps.insert(
      PackageId::new("example.com/x"),
      leaf_handle("example.com/x", "package x\nfn changed() {}\n"),
    );
    assert_ne!(base, compute_package_key(&inputs));
  }

  #[test]
  fn adjacent_fields_do_not_collide() {
    // A file moved between the compiled and extra lists must change the
    // key even though the concatenated byte stream is similar.
    let mut left = base_inputs();
    let moved = left.extra_files.pop().expect("extra file");
    left.compiled_files.push(moved);

    assert_ne!(compute_package_key(&base_inputs()), compute_package_key(&left));
  }
}
