//! The product of a full type check.

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use diagnostics::Diagnostic;

use crate::api::{PackageId, PackagePath, Uri};
use crate::checker::{TypeError, TypesInfo, TypesPackage};
use crate::error::HostError;
use crate::metadata::Metadata;
use crate::methodsets::MethodSetIndex;
use crate::parse::{ParseError, ParsedFile};
use crate::xrefs::XrefIndex;

/// A fully type-checked package: parsed syntax, resolved types and side
/// tables, indexes, and accumulated diagnostics.
///
/// Instances are immutable and shared; the snapshot memoizes them per
/// package ID so successive requests against an unchanged snapshot return
/// the same instance.
pub struct SyntaxPackage {
  pub(crate) metadata: Arc<Metadata>,
  pub(crate) compiled_files: Vec<Arc<ParsedFile>>,
  pub(crate) extra_files: Vec<Arc<ParsedFile>>,
  pub(crate) parse_errors: Vec<(Uri, ParseError)>,
  pub(crate) type_errors: Vec<TypeError>,
  pub(crate) diagnostics: Vec<Diagnostic>,
  pub(crate) types: Arc<TypesPackage>,
  pub(crate) types_info: Arc<TypesInfo>,
  pub(crate) method_sets: Arc<MethodSetIndex>,
  pub(crate) xrefs: Arc<XrefIndex>,
  /// Transitive closure of imported packages, keyed by package path.
  pub(crate) import_map: BTreeMap<PackagePath, Arc<TypesPackage>>,
  pub(crate) has_fixed_files: bool,
}

impl SyntaxPackage {
  pub fn id(&self) -> &PackageId {
    &self.metadata.id
  }

  pub fn name(&self) -> &str {
    &self.metadata.name
  }

  pub fn pkg_path(&self) -> &PackagePath {
    &self.metadata.pkg_path
  }

  pub fn metadata(&self) -> &Arc<Metadata> {
    &self.metadata
  }

  /// Files that were presented to the type checker.
  pub fn compiled_files(&self) -> &[Arc<ParsedFile>] {
    &self.compiled_files
  }

  /// All parsed package files, including ones the checker never saw.
  pub fn extra_files(&self) -> &[Arc<ParsedFile>] {
    &self.extra_files
  }

  /// The parsed file for `uri`, looking through both file lists.
  pub fn file(&self, uri: &Uri) -> Result<&Arc<ParsedFile>, HostError> {
    self
      .compiled_files
      .iter()
      .chain(&self.extra_files)
      .find(|file| file.uri() == uri)
      .ok_or_else(|| HostError::new(format!("no parsed file for {uri} in {}", self.metadata.id)))
  }

  pub fn types(&self) -> &Arc<TypesPackage> {
    &self.types
  }

  pub fn types_info(&self) -> &Arc<TypesInfo> {
    &self.types_info
  }

  pub fn method_sets(&self) -> &Arc<MethodSetIndex> {
    &self.method_sets
  }

  pub fn xrefs(&self) -> &Arc<XrefIndex> {
    &self.xrefs
  }

  /// Diagnostics accumulated during the build, ordered by file and
  /// position.
  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  /// The transitive dependency with the given package path, if imported.
  pub fn dependency_types(&self, path: &PackagePath) -> Option<&Arc<TypesPackage>> {
    self.import_map.get(path)
  }

  pub fn import_map(&self) -> &BTreeMap<PackagePath, Arc<TypesPackage>> {
    &self.import_map
  }

  pub fn has_parse_errors(&self) -> bool {
    !self.parse_errors.is_empty()
  }

  pub fn has_type_errors(&self) -> bool {
    !self.type_errors.is_empty()
  }

  /// Whether the parser repaired syntax anywhere in this package; when
  /// set, type errors were suppressed.
  pub fn has_fixed_files(&self) -> bool {
    self.has_fixed_files
  }

  /// Loader-reported missing dependencies that the checked imports still
  /// reference. Metadata is not invalidated for import deletions, so the
  /// resolved imports are consulted; the full loader set is used only
  /// when the package resolved no imports at all.
  pub fn missing_dependencies(&self) -> Vec<PackagePath> {
    if self.import_map.is_empty() {
      return self.metadata.missing_deps.iter().cloned().collect();
    }
    let missing: AHashMap<&PackagePath, ()> = self
      .metadata
      .missing_deps
      .iter()
      .map(|path| (path, ()))
      .collect();
    self
      .import_map
      .keys()
      .filter(|path| missing.contains_key(path))
      .cloned()
      .collect()
  }
}

impl std::fmt::Debug for SyntaxPackage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyntaxPackage")
      .field("id", &self.metadata.id)
      .field("compiled_files", &self.compiled_files.len())
      .field("diagnostics", &self.diagnostics.len())
      .field("has_fixed_files", &self.has_fixed_files)
      .finish_non_exhaustive()
  }
}

/// Encode diagnostics for the artifact cache.
pub(crate) fn encode_diagnostics(diagnostics: &[Diagnostic]) -> Vec<u8> {
  serde_json::to_vec(diagnostics).expect("diagnostics serialize")
}

/// Decode diagnostics fetched from the artifact cache.
pub fn decode_diagnostics(data: &[u8]) -> Result<Vec<Diagnostic>, serde_json::Error> {
  serde_json::from_slice(data)
}
