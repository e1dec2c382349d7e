//! Public identifier types for the engine.
//!
//! All identifiers are cheap `Clone` newtypes over shared strings, stable
//! for the lifetime of a [`Snapshot`](crate::Snapshot). `PackageId` is the
//! loader-assigned identity of a package; `PackagePath` is its canonical
//! import path (several IDs may share one path, e.g. test variants);
//! `ImportPath` is a path as written in a source file, which may be
//! relative or vendored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use diagnostics::Uri;

macro_rules! string_id {
  ($(#[$doc:meta])* $name:ident) => {
    $(#[$doc])*
    #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $name(Arc<str>);

    impl $name {
      /// Create a new identifier from any owned or borrowed string.
      pub fn new(value: impl Into<Arc<str>>) -> Self {
        $name(value.into())
      }

      /// Borrow the underlying string.
      pub fn as_str(&self) -> &str {
        &self.0
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(stringify!($name)).field(&self.0).finish()
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl Serialize for $name {
      fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
      }
    }

    impl<'de> Deserialize<'de> for $name {
      fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok($name::new(s))
      }
    }

    impl<T: Into<Arc<str>>> From<T> for $name {
      fn from(value: T) -> Self {
        $name::new(value)
      }
    }

    impl Default for $name {
      fn default() -> Self {
        $name::new("")
      }
    }
  };
}

string_id! {
  /// Opaque, loader-assigned package identity. Unique within a snapshot.
  PackageId
}

string_id! {
  /// Canonical import path of a package.
  PackagePath
}

string_id! {
  /// An import path as written in a source file.
  ImportPath
}

/// Content-addressed key for one package build.
///
/// Equal keys imply byte-identical export data and equivalent observable
/// output of a syntax build, so a key is sufficient to address cached
/// artifacts forever.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key([u8; 32]);

impl Key {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self {
    Key(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  /// Lowercase hex rendering, used for on-disk artifact paths.
  pub fn to_hex(&self) -> String {
    let mut out = String::with_capacity(64);
    for byte in self.0 {
      out.push_str(&format!("{byte:02x}"));
    }
    out
  }
}

impl fmt::Debug for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Key({})", self.to_hex())
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl Serialize for Key {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Key {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    let mut bytes = [0u8; 32];
    if s.len() != 64 {
      return Err(serde::de::Error::custom("key must be 64 hex digits"));
    }
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
      let hex = std::str::from_utf8(chunk).map_err(serde::de::Error::custom)?;
      bytes[i] = u8::from_str_radix(hex, 16).map_err(serde::de::Error::custom)?;
    }
    Ok(Key(bytes))
  }
}
