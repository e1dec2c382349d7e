//! Shared test fixture: an in-memory toolchain with a scripted parser and
//! checker that count their invocations, so tests can assert not just on
//! results but on which work actually ran.

#![allow(dead_code)]

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use diagnostics::TextRange;
use typecheck_tin::{
  CheckConfig, CheckOptions, FileHandle, FileSet, HostError, ImportDecl, ImportError, ImportPath,
  MemoryBlobCache, MemoryFileSource, Metadata, MetadataGraph, PackageId, PackagePath, ParseCache,
  ParseError, ParseMode, ParsedFile, ParsedSource, Snapshot, SnapshotConfig, SourceParser,
  StaticMetadata, TypeChecker, TypeError, TypesInfo, TypesPackage, Uri,
};

pub fn uri(value: &str) -> Uri {
  Uri::new(value)
}

pub fn id(value: &str) -> PackageId {
  PackageId::new(value)
}

pub fn path(value: &str) -> PackagePath {
  PackagePath::new(value)
}

/// Metadata for one package. The package ID doubles as its path, and
/// import paths are written fully qualified, which keeps test sources
/// readable.
pub fn metadata(id: &str, files: &[&str], deps: &[&str]) -> Metadata {
  Metadata {
    id: PackageId::new(id),
    name: id.rsplit('/').next().unwrap_or(id).to_string(),
    pkg_path: PackagePath::new(id),
    files: files.iter().map(|f| Uri::new(*f)).collect(),
    compiled_files: files.iter().map(|f| Uri::new(*f)).collect(),
    deps_by_import_path: deps
      .iter()
      .map(|d| (ImportPath::new(*d), PackageId::new(*d)))
      .collect(),
    deps_by_pkg_path: deps
      .iter()
      .map(|d| (PackagePath::new(*d), PackageId::new(*d)))
      .collect(),
    ..Metadata::default()
  }
}

/// Source text for a package that imports the given paths.
pub fn source(name: &str, imports: &[&str]) -> String {
  let mut text = format!("package {name}\n");
  for import in imports {
    text.push_str(&format!("import \"{import}\"\n"));
  }
  text
}

/// Line-oriented stub parser. It recognizes `import "<path>"` lines,
/// treats lines containing `BROKEN` as syntax errors, and sets the fixed
/// flag when a line contains `FIXED`.
#[derive(Default)]
pub struct StubParser {
  calls: AtomicUsize,
  parsed: Mutex<Vec<Uri>>,
}

impl StubParser {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn parse_count(&self, uri: &Uri) -> usize {
    self.parsed.lock().iter().filter(|u| *u == uri).count()
  }
}

impl SourceParser for StubParser {
  fn parse(&self, uri: &Uri, text: Arc<str>, mode: ParseMode) -> ParsedSource {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.parsed.lock().push(uri.clone());

    let mut imports = Vec::new();
    let mut errors = Vec::new();
    let mut fixed = false;
    let mut offset = 0u32;
    for line in text.split_inclusive('\n') {
      let trimmed = line.trim_end();
      if let Some(rest) = trimmed.strip_prefix("import \"") {
        if let Some(end) = rest.find('"') {
          let start = offset + "import \"".len() as u32;
          imports.push(ImportDecl {
            path: ImportPath::new(&rest[..end]),
            range: TextRange::new(start, start + end as u32),
          });
        }
      }
      if trimmed.contains("BROKEN") {
        errors.push(ParseError {
          range: TextRange::new(offset, offset + trimmed.len() as u32),
          message: "syntax error".to_string(),
        });
      }
      if trimmed.contains("FIXED") {
        fixed = true;
      }
      offset += line.len() as u32;
    }

    ParsedSource {
      text,
      mode,
      imports,
      errors,
      fixed,
      ast: None,
    }
  }
}

/// Export-data payload used by [`StubChecker`]. Dependencies are listed
/// by path and resolved through the engine's callback on import.
#[derive(Serialize, Deserialize)]
struct ExportBlob {
  path: PackagePath,
  name: String,
  deps: Vec<PackagePath>,
}

type CheckHook = Box<dyn Fn(&PackagePath) + Send + Sync>;

/// Scripted checker. Imports are resolved through the engine's importer
/// (so import failures surface exactly like real ones), and per-package
/// type errors can be scripted ahead of a run.
#[derive(Default)]
pub struct StubChecker {
  checked: Mutex<Vec<(PackagePath, bool)>>,
  exports: AtomicUsize,
  decoded: Mutex<Vec<PackagePath>>,
  errors: Mutex<AHashMap<PackagePath, Vec<TypeError>>>,
  on_check: Mutex<Option<CheckHook>>,
}

impl StubChecker {
  /// Script type errors to be reported on every full check of `pkg`.
  pub fn script_errors(&self, pkg: &PackagePath, errors: Vec<TypeError>) {
    self.errors.lock().insert(pkg.clone(), errors);
  }

  /// Install a hook invoked at the start of every check.
  pub fn set_on_check(&self, hook: impl Fn(&PackagePath) + Send + Sync + 'static) {
    *self.on_check.lock() = Some(Box::new(hook));
  }

  pub fn clear_on_check(&self) {
    *self.on_check.lock() = None;
  }

  pub fn total_checks(&self) -> usize {
    self.checked.lock().len()
  }

  pub fn full_checks(&self, pkg: &PackagePath) -> usize {
    self
      .checked
      .lock()
      .iter()
      .filter(|(p, ignore_bodies)| p == pkg && !ignore_bodies)
      .count()
  }

  pub fn stripped_checks(&self, pkg: &PackagePath) -> usize {
    self
      .checked
      .lock()
      .iter()
      .filter(|(p, ignore_bodies)| p == pkg && *ignore_bodies)
      .count()
  }

  pub fn checks_of(&self, pkg: &PackagePath) -> usize {
    self.checked.lock().iter().filter(|(p, _)| p == pkg).count()
  }

  pub fn exports(&self) -> usize {
    self.exports.load(Ordering::SeqCst)
  }

  pub fn decode_count(&self, pkg: &PackagePath) -> usize {
    self.decoded.lock().iter().filter(|p| *p == pkg).count()
  }
}

impl TypeChecker for StubChecker {
  fn check(
    &self,
    _fset: &FileSet,
    config: &CheckConfig<'_>,
    files: &[Arc<ParsedFile>],
    _info: &mut TypesInfo,
  ) -> Arc<TypesPackage> {
    if let Some(hook) = self.on_check.lock().as_ref() {
      hook(&config.pkg_path);
    }
    self
      .checked
      .lock()
      .push((config.pkg_path.clone(), config.ignore_bodies));

    let mut imports = Vec::new();
    let mut seen = Vec::new();
    for file in files {
      for decl in file.imports() {
        if seen.contains(&decl.path) {
          continue;
        }
        seen.push(decl.path.clone());
        match config.importer.import(&decl.path) {
          Ok(dep) => imports.push(dep),
          Err(err) => (config.error_sink)(TypeError::new(
            diagnostics::Span::new(file.uri().clone(), decl.range),
            format!("could not import {}: {}", decl.path, err),
          )),
        }
      }
    }

    if !config.ignore_bodies {
      if let Some(scripted) = self.errors.lock().get(&config.pkg_path) {
        for error in scripted {
          (config.error_sink)(error.clone());
        }
      }
    }

    TypesPackage::new(config.pkg_path.clone(), config.name.clone(), imports)
  }

  fn export_shallow(&self, _fset: &FileSet, pkg: &TypesPackage) -> Result<Vec<u8>, HostError> {
    self.exports.fetch_add(1, Ordering::SeqCst);
    let blob = ExportBlob {
      path: pkg.path().clone(),
      name: pkg.name().to_string(),
      deps: pkg.imports().iter().map(|dep| dep.path().clone()).collect(),
    };
    serde_json::to_vec(&blob).map_err(|err| HostError::new(err.to_string()))
  }

  fn import_shallow(
    &self,
    _fset: &FileSet,
    data: &[u8],
    path: &PackagePath,
    get_package: &(dyn Fn(&PackagePath) -> Result<Arc<TypesPackage>, ImportError> + Sync),
  ) -> Result<Arc<TypesPackage>, HostError> {
    let blob: ExportBlob =
      serde_json::from_slice(data).map_err(|err| HostError::new(err.to_string()))?;
    if &blob.path != path {
      return Err(HostError::new(format!(
        "export data is for {}, not {path}",
        blob.path
      )));
    }
    self.decoded.lock().push(path.clone());

    let mut imports = Vec::new();
    for dep in &blob.deps {
      let pkg = get_package(dep).map_err(|err| HostError::new(err.to_string()))?;
      imports.push(pkg);
    }
    Ok(TypesPackage::new(blob.path, blob.name, imports))
  }
}

/// Session-scoped services shared by the snapshots of one test.
pub struct TestSession {
  pub files: Arc<MemoryFileSource>,
  pub parser: Arc<StubParser>,
  pub checker: Arc<StubChecker>,
  pub blobs: Arc<MemoryBlobCache>,
  pub parse_cache: Arc<ParseCache>,
  pub options: CheckOptions,
}

impl TestSession {
  pub fn new() -> TestSession {
    let parser = Arc::new(StubParser::default());
    let parse_cache = Arc::new(ParseCache::new(
      Arc::clone(&parser) as Arc<dyn SourceParser>,
      ParseCache::DEFAULT_CAPACITY,
    ));
    TestSession {
      files: Arc::new(MemoryFileSource::new()),
      parser,
      checker: Arc::new(StubChecker::default()),
      blobs: Arc::new(MemoryBlobCache::new()),
      parse_cache,
      options: CheckOptions::default(),
    }
  }

  pub fn add_file(&self, uri_str: &str, text: &str) {
    self.files.insert(uri(uri_str), text);
  }

  pub fn snapshot(&self, graph: MetadataGraph) -> Snapshot {
    self.snapshot_with(graph, Vec::new(), None)
  }

  pub fn snapshot_with(
    &self,
    graph: MetadataGraph,
    overlays: Vec<FileHandle>,
    prev_import_graph: Option<Arc<typecheck_tin::ImportGraph>>,
  ) -> Snapshot {
    Snapshot::new(SnapshotConfig {
      files: Arc::clone(&self.files) as Arc<dyn typecheck_tin::FileSource>,
      overlays,
      loader: Arc::new(StaticMetadata(graph)),
      parse_cache: Arc::clone(&self.parse_cache),
      checker: Arc::clone(&self.checker) as Arc<dyn TypeChecker>,
      blobs: Arc::clone(&self.blobs) as Arc<dyn typecheck_tin::BlobCache>,
      options: self.options.clone(),
      prev_import_graph,
    })
  }
}
