//! Method-set index over a checked package.
//!
//! Built once per full check and cached as its own artifact, so that
//! implementation-search features can consult method sets without keeping
//! whole syntax packages alive. Layout is sorted maps throughout, giving a
//! deterministic encoding for any given input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use diagnostics::Span;

use crate::api::PackagePath;
use crate::checker::{ObjectKind, TypesInfo};

/// One method of a named type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntry {
  pub name: String,
  pub decl: Option<Span>,
  pub exported: bool,
}

/// Methods of every named type declared in one package, keyed by receiver
/// type name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSetIndex {
  types: BTreeMap<String, Vec<MethodEntry>>,
}

impl MethodSetIndex {
  /// Build the index from the checker's side tables, keeping only methods
  /// whose receiver type belongs to `own`.
  pub fn build(own: &PackagePath, info: &TypesInfo) -> MethodSetIndex {
    let mut types: BTreeMap<String, Vec<MethodEntry>> = BTreeMap::new();
    for object in &info.objects {
      let receiver = match &object.kind {
        ObjectKind::Method { receiver } => receiver,
        _ => continue,
      };
      if object.pkg.as_ref() != Some(own) {
        continue;
      }
      types.entry(receiver.clone()).or_default().push(MethodEntry {
        name: object.name.clone(),
        decl: object.decl.clone(),
        exported: object.exported,
      });
    }
    for methods in types.values_mut() {
      methods.sort_by(|a, b| a.name.cmp(&b.name));
    }
    MethodSetIndex { types }
  }

  /// Methods of the named type, or `None` when the type has none.
  pub fn method_set(&self, type_name: &str) -> Option<&[MethodEntry]> {
    self.types.get(type_name).map(Vec::as_slice)
  }

  pub fn types(&self) -> impl Iterator<Item = (&str, &[MethodEntry])> {
    self
      .types
      .iter()
      .map(|(name, methods)| (name.as_str(), methods.as_slice()))
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  pub fn encode(&self) -> Vec<u8> {
    serde_json::to_vec(self).expect("method-set index serializes")
  }

  pub fn decode(data: &[u8]) -> Result<MethodSetIndex, serde_json::Error> {
    serde_json::from_slice(data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::checker::ObjectInfo;
  use diagnostics::{TextRange, Uri};

  fn method(pkg: &str, receiver: &str, name: &str) -> ObjectInfo {
    ObjectInfo {
      name: name.to_string(),
      pkg: Some(PackagePath::new(pkg)),
      kind: ObjectKind::Method {
        receiver: receiver.to_string(),
      },
      decl: Some(Span::new(Uri::new("file:///a.tin"), TextRange::new(0, 1))),
      exported: name.chars().next().is_some_and(|c| c.is_uppercase()),
    }
  }

  #[test]
  fn groups_methods_by_receiver_in_sorted_order() {
    let own = PackagePath::new("example.com/a");
    let mut info = TypesInfo::default();
    info.objects.push(method("example.com/a", "Conn", "Write"));
    info.objects.push(method("example.com/a", "Conn", "Close"));
    info.objects.push(method("example.com/a", "Pool", "Get"));
    info.objects.push(ObjectInfo {
      name: "Conn".to_string(),
      pkg: Some(own.clone()),
      kind: ObjectKind::Type,
      decl: None,
      exported: true,
    });

    let index = MethodSetIndex::build(&own, &info);
    let conn: Vec<_> = index
      .method_set("Conn")
      .expect("Conn methods")
      .iter()
      .map(|m| m.name.as_str())
      .collect();
    assert_eq!(conn, vec!["Close", "Write"]);
    assert!(index.method_set("Missing").is_none());
  }

  #[test]
  fn foreign_methods_are_excluded() {
    let own = PackagePath::new("example.com/a");
    let mut info = TypesInfo::default();
    info.objects.push(method("example.com/b", "Conn", "Write"));

    let index = MethodSetIndex::build(&own, &info);
    assert!(index.is_empty());
  }

  #[test]
  fn encode_decode_round_trip() {
    let own = PackagePath::new("example.com/a");
    let mut info = TypesInfo::default();
    info.objects.push(method("example.com/a", "Conn", "Write"));

    let index = MethodSetIndex::build(&own, &info);
    let decoded = MethodSetIndex::decode(&index.encode()).expect("decode");
    assert_eq!(decoded, index);
  }
}
