//! External type-checker boundary.
//!
//! The checker itself is a black box reached through [`TypeChecker`]. The
//! engine owns only the shells the orchestration layer needs: the
//! [`TypesPackage`] handle that importers exchange, the [`TypesInfo`] side
//! tables that indexes and IDE features are built from, and the error type
//! the checker reports through its sink.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

use diagnostics::Span;

use crate::api::{ImportPath, PackagePath};
use crate::error::HostError;
use crate::fileset::FileSet;
use crate::metadata::Sizes;
use crate::parse::ParsedFile;

/// Path and identity of the compiler-builtin sentinel package. It cannot
/// be parsed, checked, or exported; the engine substitutes the canonical
/// singleton wherever it appears.
pub const UNSAFE_PKG: &str = "unsafe";

static UNSAFE_PACKAGE: Lazy<Arc<TypesPackage>> = Lazy::new(|| {
  Arc::new(TypesPackage {
    path: PackagePath::new(UNSAFE_PKG),
    name: UNSAFE_PKG.to_string(),
    imports: Vec::new(),
  })
});

/// The checker's view of a package: the opaque value dependents consume
/// when importing. One instance may originate from a full check, a
/// stripped check, or decoded export data; for the purpose of checking
/// dependents these are interchangeable.
pub struct TypesPackage {
  path: PackagePath,
  name: String,
  imports: Vec<Arc<TypesPackage>>,
}

impl TypesPackage {
  pub fn new(
    path: PackagePath,
    name: impl Into<String>,
    imports: Vec<Arc<TypesPackage>>,
  ) -> Arc<TypesPackage> {
    Arc::new(TypesPackage {
      path,
      name: name.into(),
      imports,
    })
  }

  /// The canonical singleton for the builtin sentinel package.
  pub fn unsafe_package() -> Arc<TypesPackage> {
    Arc::clone(&UNSAFE_PACKAGE)
  }

  pub fn path(&self) -> &PackagePath {
    &self.path
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Directly imported packages, as recorded by the checker.
  pub fn imports(&self) -> &[Arc<TypesPackage>] {
    &self.imports
  }

  pub fn is_unsafe(&self) -> bool {
    self.path.as_str() == UNSAFE_PKG
  }
}

impl fmt::Debug for TypesPackage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TypesPackage")
      .field("path", &self.path)
      .field("name", &self.name)
      .field("imports", &self.imports.len())
      .finish()
  }
}

/// Index of an object in [`TypesInfo::objects`].
pub type ObjectId = u32;

/// What kind of thing an object is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
  Const,
  Var,
  Field,
  Func,
  /// A method; `receiver` names the receiver type.
  Method { receiver: String },
  Type,
}

/// One resolved object (declaration target).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
  pub name: String,
  /// Owning package path; `None` for universe-scope objects.
  pub pkg: Option<PackagePath>,
  pub kind: ObjectKind,
  /// Declaration site, when known.
  pub decl: Option<Span>,
  pub exported: bool,
}

/// An identifier that declares an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefSite {
  pub object: ObjectId,
  pub span: Span,
}

/// An identifier that refers to an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UseSite {
  pub object: ObjectId,
  pub span: Span,
}

/// A selector expression resolved to a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
  pub span: Span,
  pub receiver: String,
  pub object: ObjectId,
}

/// The type of one expression, rendered by the checker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExprType {
  pub span: Span,
  pub ty: String,
}

/// A lexical scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeInfo {
  pub span: Span,
  pub parent: Option<u32>,
}

/// Side tables the checker fills during a full check: resolved
/// identifiers, expression types, selections, and scopes. Import-only
/// checks leave these empty.
#[derive(Debug, Default)]
pub struct TypesInfo {
  pub objects: Vec<ObjectInfo>,
  pub defs: Vec<DefSite>,
  pub uses: Vec<UseSite>,
  pub expr_types: Vec<ExprType>,
  pub selections: Vec<Selection>,
  pub scopes: Vec<ScopeInfo>,
}

impl TypesInfo {
  pub fn object(&self, id: ObjectId) -> Option<&ObjectInfo> {
    self.objects.get(id as usize)
  }
}

/// A type error reported through the checker's error sink. Errors whose
/// message starts with a tab character are continuations of the previous
/// error ("see also" locations).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeError {
  pub span: Span,
  pub message: String,
}

impl TypeError {
  pub fn new(span: Span, message: impl Into<String>) -> TypeError {
    TypeError {
      span,
      message: message.into(),
    }
  }
}

/// Failure to resolve an import; becomes a type error at the import site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportError {
  pub message: String,
}

impl ImportError {
  pub fn new(message: impl Into<String>) -> ImportError {
    ImportError {
      message: message.into(),
    }
  }
}

impl fmt::Display for ImportError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

/// Resolves import paths for the checker. Synchronous by design: the
/// engine bridges to its future-based resolution by blocking, relying on
/// the rule that the CPU token is acquired only after predecessors are
/// awaited.
pub trait Importer: Sync {
  fn import(&self, path: &ImportPath) -> Result<Arc<TypesPackage>, ImportError>;
}

/// Configuration for one run of the external checker.
pub struct CheckConfig<'a> {
  pub pkg_path: PackagePath,
  pub name: String,
  pub sizes: Sizes,
  /// Validated language version, if any.
  pub lang_version: Option<String>,
  /// Skip function bodies; used for import-only checks.
  pub ignore_bodies: bool,
  pub importer: &'a dyn Importer,
  /// Receives type errors as the checker finds them. The checker keeps
  /// going after errors.
  pub error_sink: &'a (dyn Fn(TypeError) + Send + Sync),
}

/// The external type checker and its export-data codec.
pub trait TypeChecker: Send + Sync {
  /// Run the checker over `files`, populating `info` (unless
  /// `config.ignore_bodies` is set, in which case implementations may
  /// leave it empty). Runs to completion even if cancellation is
  /// requested; the engine discards the result afterwards.
  fn check(
    &self,
    fset: &FileSet,
    config: &CheckConfig<'_>,
    files: &[Arc<ParsedFile>],
    info: &mut TypesInfo,
  ) -> Arc<TypesPackage>;

  /// Encode a package's exported API as opaque bytes.
  fn export_shallow(&self, fset: &FileSet, pkg: &TypesPackage) -> Result<Vec<u8>, HostError>;

  /// Decode export data produced by [`TypeChecker::export_shallow`].
  /// `get_package` is invoked for each referenced dependency path; the
  /// package being decoded is handled internally.
  fn import_shallow(
    &self,
    fset: &FileSet,
    data: &[u8],
    path: &PackagePath,
    get_package: &(dyn Fn(&PackagePath) -> Result<Arc<TypesPackage>, ImportError> + Sync),
  ) -> Result<Arc<TypesPackage>, HostError>;
}

/// Transitive closure of a package's imports, keyed by package path.
/// A visited set guards against metadata cycles.
pub(crate) fn transitive_imports(
  root: &Arc<TypesPackage>,
) -> AHashMap<PackagePath, Arc<TypesPackage>> {
  let mut out: AHashMap<PackagePath, Arc<TypesPackage>> = AHashMap::new();
  let mut stack = vec![Arc::clone(root)];
  while let Some(pkg) = stack.pop() {
    if out.contains_key(pkg.path()) {
      continue;
    }
    out.insert(pkg.path().clone(), Arc::clone(&pkg));
    for imp in pkg.imports() {
      stack.push(Arc::clone(imp));
    }
  }
  out
}
