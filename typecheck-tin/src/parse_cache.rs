//! Memoization of parse results across packages, batches, and snapshots.
//!
//! Entries are keyed by `(content hash, mode)` so that overlapping file
//! lists, shared dependencies, and successive snapshots all reuse the same
//! parse. The cache is bounded with deterministic clock eviction; a live
//! package keeps its parsed files pinned through its own `Arc`s, so
//! eviction only ever drops cache residency, never data.

use ahash::{AHashMap, AHashSet, RandomState};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::FatalError;
use crate::files::{ContentHash, FileHandle};
use crate::fileset::FileSet;
use crate::parse::{ParseMode, ParsedFile, ParsedSource, SourceParser};

fn stable_hasher() -> RandomState {
  RandomState::with_seeds(0, 0, 0, 0)
}

/// Cache occupancy and traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseCacheStats {
  pub hits: u64,
  pub misses: u64,
  pub insertions: u64,
  pub evictions: u64,
}

struct ClockEntry<K, V> {
  key: K,
  value: V,
  ref_bit: bool,
}

/// Deterministic bounded cache with second-chance eviction.
struct ClockCache<K, V> {
  entries: Vec<ClockEntry<K, V>>,
  index: HashMap<K, usize, RandomState>,
  hand: usize,
  capacity: usize,
  stats: ParseCacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> ClockCache<K, V> {
  fn new(capacity: usize) -> Self {
    Self {
      entries: Vec::new(),
      index: HashMap::with_hasher(stable_hasher()),
      hand: 0,
      capacity,
      stats: ParseCacheStats::default(),
    }
  }

  fn get(&mut self, key: &K) -> Option<V> {
    if self.capacity == 0 {
      self.stats.misses += 1;
      return None;
    }
    match self.index.get(key).copied() {
      Some(idx) => {
        self.stats.hits += 1;
        let entry = &mut self.entries[idx];
        entry.ref_bit = true;
        Some(entry.value.clone())
      }
      None => {
        self.stats.misses += 1;
        None
      }
    }
  }

  fn insert(&mut self, key: K, value: V) {
    if self.capacity == 0 {
      return;
    }
    if let Some(idx) = self.index.get(&key).copied() {
      self.entries[idx].value = value;
      self.entries[idx].ref_bit = true;
      return;
    }
    self.stats.insertions += 1;
    if self.entries.len() < self.capacity {
      self.index.insert(key.clone(), self.entries.len());
      self.entries.push(ClockEntry {
        key,
        value,
        ref_bit: true,
      });
      return;
    }
    loop {
      let candidate = &mut self.entries[self.hand];
      if candidate.ref_bit {
        candidate.ref_bit = false;
        self.hand = (self.hand + 1) % self.entries.len();
        continue;
      }
      self.stats.evictions += 1;
      self.index.remove(&candidate.key);
      self.index.insert(key.clone(), self.hand);
      *candidate = ClockEntry {
        key,
        value,
        ref_bit: true,
      };
      self.hand = (self.hand + 1) % self.entries.len();
      return;
    }
  }
}

/// Shared, concurrency-safe cache of parse results.
pub struct ParseCache {
  parser: Arc<dyn SourceParser>,
  cache: Mutex<ClockCache<(ContentHash, ParseMode), Arc<ParsedSource>>>,
}

impl ParseCache {
  pub const DEFAULT_CAPACITY: usize = 2048;

  pub fn new(parser: Arc<dyn SourceParser>, capacity: usize) -> ParseCache {
    ParseCache {
      parser,
      cache: Mutex::new(ClockCache::new(capacity)),
    }
  }

  pub fn stats(&self) -> ParseCacheStats {
    self.cache.lock().stats
  }

  /// Parse all handles in `mode`, assigning each file a disjoint base in
  /// `fset`. Cache misses are parsed in parallel; results keep handle
  /// order.
  pub fn parse_files(
    &self,
    fset: &FileSet,
    mode: ParseMode,
    handles: &[FileHandle],
    cancel: &CancelToken,
  ) -> Result<Vec<Arc<ParsedFile>>, FatalError> {
    cancel.check()?;

    let mut sources: Vec<Option<Arc<ParsedSource>>> = Vec::with_capacity(handles.len());
    {
      let mut cache = self.cache.lock();
      for handle in handles {
        sources.push(cache.get(&(handle.hash(), mode)));
      }
    }

    // Identical content appearing under several URIs (or several times in
    // one request) is parsed once.
    let mut seen: AHashSet<ContentHash> = AHashSet::new();
    let missing: Vec<usize> = (0..handles.len())
      .filter(|&i| sources[i].is_none() && seen.insert(handles[i].hash()))
      .collect();
    if !missing.is_empty() {
      let parsed: Vec<(usize, Arc<ParsedSource>)> = missing
        .par_iter()
        .map(|&i| {
          let handle = &handles[i];
          let source = self
            .parser
            .parse(handle.uri(), handle.text().clone(), mode);
          (i, Arc::new(source))
        })
        .collect();

      let mut by_hash: AHashMap<ContentHash, Arc<ParsedSource>> = AHashMap::new();
      let mut cache = self.cache.lock();
      for (i, source) in parsed {
        cache.insert((handles[i].hash(), mode), Arc::clone(&source));
        by_hash.insert(handles[i].hash(), source);
      }
      for (i, slot) in sources.iter_mut().enumerate() {
        if slot.is_none() {
          *slot = by_hash.get(&handles[i].hash()).cloned();
        }
      }
    }

    cancel.check()?;

    let mut files = Vec::with_capacity(handles.len());
    for (handle, source) in handles.iter().zip(sources) {
      let source = source.expect("all parse slots filled");
      let len = handle.text().len().min(u32::MAX as usize) as u32;
      let base = fset.add(handle.uri().clone(), len);
      files.push(Arc::new(ParsedFile::new(handle, base, source)));
    }
    Ok(files)
  }
}
