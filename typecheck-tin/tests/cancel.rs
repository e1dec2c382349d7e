//! Cancellation mid-batch: the call fails, nothing is memoized, and a
//! fresh snapshot recovers.

mod common;

use common::*;
use typecheck_tin::{FatalError, MetadataGraph};

#[test]
fn cancellation_during_the_checker_discards_results() {
  let session = TestSession::new();
  session.add_file("file:///w/a/a.tin", &source("a", &[]));
  let graph = || MetadataGraph::new([metadata("example.com/a", &["file:///w/a/a.tin"], &[])]);

  let snapshot = session.snapshot(graph());
  // The external checker is not cancellable in flight: it runs to
  // completion and the engine drops its output afterwards.
  {
    let snapshot = snapshot.clone();
    session.checker.set_on_check(move |_| snapshot.cancel());
  }

  let err = snapshot
    .type_check(&[id("example.com/a")])
    .expect_err("cancelled mid-check");
  assert!(err.is_cancelled(), "got {err:?}");
  assert!(
    snapshot.active_package(&id("example.com/a")).is_none(),
    "nothing may be committed to the active-package cache"
  );

  // A live snapshot over the same session succeeds.
  session.checker.clear_on_check();
  let fresh = session.snapshot(graph());
  let pkgs = fresh
    .type_check(&[id("example.com/a")])
    .expect("fresh snapshot recovers");
  assert_eq!(pkgs.len(), 1);
  assert_eq!(pkgs[0].types().name(), "a");
}

#[test]
fn cancelled_snapshot_rejects_new_work_immediately() {
  let session = TestSession::new();
  session.add_file("file:///w/a/a.tin", &source("a", &[]));
  let graph = MetadataGraph::new([metadata("example.com/a", &["file:///w/a/a.tin"], &[])]);

  let snapshot = session.snapshot(graph);
  snapshot.cancel();

  let err = snapshot
    .type_check(&[id("example.com/a")])
    .expect_err("cancelled before start");
  assert_eq!(err, FatalError::Cancelled);
  assert_eq!(session.checker.total_checks(), 0);
}

#[test]
fn dependency_cancellation_is_never_recoverable() {
  let session = TestSession::new();
  session.add_file("file:///w/a/a.tin", &source("a", &[]));
  session.add_file("file:///w/b/b.tin", &source("b", &["example.com/a"]));
  let graph = MetadataGraph::new([
    metadata("example.com/a", &["file:///w/a/a.tin"], &[]),
    metadata("example.com/b", &["file:///w/b/b.tin"], &["example.com/a"]),
  ]);

  let snapshot = session.snapshot(graph);
  // Cancel while the dependency is inside the checker; unlike an
  // ordinary dependency failure this must fail b's build too.
  {
    let snapshot = snapshot.clone();
    session.checker.set_on_check(move |pkg| {
      if pkg.as_str() == "example.com/a" {
        snapshot.cancel();
      }
    });
  }

  let err = snapshot
    .type_check(&[id("example.com/b")])
    .expect_err("cancellation propagates through dependencies");
  assert!(err.is_cancelled());
  assert_eq!(
    session.checker.full_checks(&path("example.com/b")),
    0,
    "b must not be checked after cancellation"
  );
}
