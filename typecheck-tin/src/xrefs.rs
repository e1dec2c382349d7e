//! Cross-reference index over a checked package.
//!
//! Records, for each object of *another* package referenced from this
//! one, every reference location. Like the method-set index it is built
//! during the full check and cached as a standalone artifact, which is
//! what lets find-references answer from cache for packages whose syntax
//! was never loaded in this session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use diagnostics::Span;

use crate::api::PackagePath;
use crate::checker::TypesInfo;

/// References to one foreign object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefEntry {
  pub pkg: PackagePath,
  pub name: String,
  pub refs: Vec<Span>,
}

/// All cross-package references made by one package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefIndex {
  entries: Vec<XrefEntry>,
}

impl XrefIndex {
  /// Build the index from the checker's side tables. Only uses that
  /// resolve to objects owned by a package other than `own` are recorded.
  pub fn build(own: &PackagePath, info: &TypesInfo) -> XrefIndex {
    let mut grouped: BTreeMap<(PackagePath, String), Vec<Span>> = BTreeMap::new();
    for site in &info.uses {
      let object = match info.object(site.object) {
        Some(object) => object,
        None => continue,
      };
      let pkg = match &object.pkg {
        Some(pkg) if pkg != own => pkg.clone(),
        _ => continue,
      };
      grouped
        .entry((pkg, object.name.clone()))
        .or_default()
        .push(site.span.clone());
    }

    let entries = grouped
      .into_iter()
      .map(|((pkg, name), mut refs)| {
        refs.sort();
        refs.dedup();
        XrefEntry { pkg, name, refs }
      })
      .collect();
    XrefIndex { entries }
  }

  /// Reference locations for `name` in `pkg`, if any.
  pub fn lookup(&self, pkg: &PackagePath, name: &str) -> Option<&[Span]> {
    self
      .entries
      .iter()
      .find(|entry| &entry.pkg == pkg && entry.name == name)
      .map(|entry| entry.refs.as_slice())
  }

  pub fn entries(&self) -> &[XrefEntry] {
    &self.entries
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn encode(&self) -> Vec<u8> {
    serde_json::to_vec(self).expect("xref index serializes")
  }

  pub fn decode(data: &[u8]) -> Result<XrefIndex, serde_json::Error> {
    serde_json::from_slice(data)
  }
}
