//! Type-checking orchestration engine for the tin language server.
//!
//! The engine takes a graph of packages and produces, for each requested
//! package, a fully type-checked [`SyntaxPackage`]: parsed syntax,
//! resolved types and side tables, a method-set index, a cross-reference
//! index, and diagnostics. The parser and the type checker themselves are
//! external collaborators reached through the [`SourceParser`] and
//! [`TypeChecker`] traits; this crate owns everything around them:
//! deduplication of in-flight work, snapshot-based content-addressed
//! memoization, the two-tier build scheme (import-only from cached export
//! data vs. full syntax builds), the snapshot-spanning import graph,
//! bounded CPU parallelism, and cooperative cancellation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use typecheck_tin::{
//!   CheckConfig, CheckOptions, FileSet, HostError, ImportError, MemoryBlobCache,
//!   MemoryFileSource, Metadata, MetadataGraph, PackageId, PackagePath, ParseCache,
//!   ParseMode, ParsedFile, ParsedSource, Snapshot, SnapshotConfig, SourceParser,
//!   StaticMetadata, TypeChecker, TypesInfo, TypesPackage, Uri,
//! };
//!
//! struct TrivialParser;
//!
//! impl SourceParser for TrivialParser {
//!   fn parse(&self, _uri: &Uri, text: Arc<str>, mode: ParseMode) -> ParsedSource {
//!     ParsedSource {
//!       text,
//!       mode,
//!       imports: Vec::new(),
//!       errors: Vec::new(),
//!       fixed: false,
//!       ast: None,
//!     }
//!   }
//! }
//!
//! struct TrivialChecker;
//!
//! impl TypeChecker for TrivialChecker {
//!   fn check(
//!     &self,
//!     _fset: &FileSet,
//!     config: &CheckConfig<'_>,
//!     _files: &[Arc<ParsedFile>],
//!     _info: &mut TypesInfo,
//!   ) -> Arc<TypesPackage> {
//!     TypesPackage::new(config.pkg_path.clone(), config.name.clone(), Vec::new())
//!   }
//!
//!   fn export_shallow(&self, _fset: &FileSet, pkg: &TypesPackage) -> Result<Vec<u8>, HostError> {
//!     Ok(pkg.name().as_bytes().to_vec())
//!   }
//!
//!   fn import_shallow(
//!     &self,
//!     _fset: &FileSet,
//!     data: &[u8],
//!     path: &PackagePath,
//!     _get_package: &(dyn Fn(&PackagePath) -> Result<Arc<TypesPackage>, ImportError> + Sync),
//!   ) -> Result<Arc<TypesPackage>, HostError> {
//!     let name = String::from_utf8(data.to_vec()).map_err(|err| HostError::new(err.to_string()))?;
//!     Ok(TypesPackage::new(path.clone(), name, Vec::new()))
//!   }
//! }
//!
//! let files = Arc::new(MemoryFileSource::new());
//! files.insert(Uri::new("file:///w/a/a.tin"), "package a\n");
//!
//! let metadata = MetadataGraph::new([Metadata {
//!   id: PackageId::new("example.com/a"),
//!   name: "a".to_string(),
//!   pkg_path: PackagePath::new("example.com/a"),
//!   files: vec![Uri::new("file:///w/a/a.tin")],
//!   compiled_files: vec![Uri::new("file:///w/a/a.tin")],
//!   ..Metadata::default()
//! }]);
//!
//! let snapshot = Snapshot::new(SnapshotConfig {
//!   files,
//!   overlays: Vec::new(),
//!   loader: Arc::new(StaticMetadata(metadata)),
//!   parse_cache: Arc::new(ParseCache::new(
//!     Arc::new(TrivialParser),
//!     ParseCache::DEFAULT_CAPACITY,
//!   )),
//!   checker: Arc::new(TrivialChecker),
//!   blobs: Arc::new(MemoryBlobCache::new()),
//!   options: CheckOptions::default(),
//!   prev_import_graph: None,
//! });
//!
//! let pkgs = snapshot
//!   .type_check(&[PackageId::new("example.com/a")])
//!   .expect("type check succeeds");
//! assert_eq!(pkgs.len(), 1);
//! assert_eq!(pkgs[0].types().name(), "a");
//! assert!(pkgs[0].diagnostics().is_empty());
//! ```

mod api;
mod batch;
mod cancel;
mod checker;
mod diags;
mod error;
mod filecache;
mod files;
mod fileset;
mod handle;
mod import_graph;
mod key;
mod metadata;
mod methodsets;
mod options;
mod parse;
mod parse_cache;
mod pkg;
mod snapshot;
mod sync;
mod xrefs;

pub use diagnostics::{Diagnostic, DiagnosticSource, Related, Severity, Span, TextRange};

pub use api::{ImportPath, Key, PackageId, PackagePath, Uri};
pub use batch::{PostTypeCheck, PreTypeCheck};
pub use cancel::CancelToken;
pub use checker::{
  CheckConfig, DefSite, ExprType, ImportError, Importer, ObjectId, ObjectInfo, ObjectKind,
  ScopeInfo, Selection, TypeChecker, TypeError, TypesInfo, TypesPackage, UseSite, UNSAFE_PKG,
};
pub use error::{FatalError, HostError};
pub use filecache::{ArtifactKind, BlobCache, DiskBlobCache, MemoryBlobCache};
pub use files::{ContentHash, FileHandle, FileSource, MemoryFileSource};
pub use fileset::{FileSet, FileSpan};
pub use handle::{PackageHandle, TypeCheckInputs};
pub use import_graph::ImportGraph;
pub use key::compute_package_key;
pub use metadata::{Metadata, MetadataGraph, MetadataLoader, ModuleInfo, Sizes, StaticMetadata};
pub use methodsets::{MethodEntry, MethodSetIndex};
pub use options::CheckOptions;
pub use parse::{ImportDecl, ParseError, ParseMode, ParsedFile, ParsedSource, SourceParser};
pub use parse_cache::{ParseCache, ParseCacheStats};
pub use pkg::{decode_diagnostics, SyntaxPackage};
pub use snapshot::{Snapshot, SnapshotConfig};
pub use xrefs::{XrefEntry, XrefIndex};
