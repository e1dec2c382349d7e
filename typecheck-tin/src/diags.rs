//! Conversion of parse and type errors into diagnostics.
//!
//! The external checker reports some errors as a primary followed by
//! continuation errors whose message starts with a tab; those are "see
//! also" locations. [`expand_errors`] associates each continuation with
//! its primary and additionally clones the primary to every continuation
//! location, because not every editor surfaces related information.

use diagnostics::{Diagnostic, DiagnosticSource, Related, Span};

use crate::api::Uri;
use crate::checker::TypeError;
use crate::parse::ParseError;

/// A primary type error together with its continuation errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExtendedError {
  pub primary: TypeError,
  pub secondaries: Vec<TypeError>,
}

/// Group tab-prefixed continuation errors under their primary, then clone
/// each primary to its continuation locations.
///
/// For a primary with N continuations this produces 1 + N entries: the
/// primary (with all continuations attached), and one relocated entry per
/// continuation whose message is the primary's, suffixed with
/// `(see details)` when the client supports related information or with
/// `(this error: <continuation>)` when it does not.
pub(crate) fn expand_errors(
  errors: Vec<TypeError>,
  supports_related_information: bool,
) -> Vec<ExtendedError> {
  let mut result = Vec::new();
  let mut iter = errors.into_iter().peekable();
  while let Some(primary) = iter.next() {
    let mut original = ExtendedError {
      primary,
      secondaries: Vec::new(),
    };
    while iter
      .peek()
      .is_some_and(|next| next.message.starts_with('\t'))
    {
      let mut secondary = iter.next().expect("peeked");
      secondary.message.remove(0);
      original.secondaries.push(secondary);
    }

    // Clone the error to all its related locations; most editors will not
    // do it for us.
    for (index, continuation) in original.secondaries.iter().enumerate() {
      let message = if supports_related_information {
        format!("{} (see details)", original.primary.message)
      } else {
        format!(
          "{} (this error: {})",
          original.primary.message, continuation.message
        )
      };
      let relocated = TypeError::new(continuation.span.clone(), message);

      let mut secondaries = vec![original.primary.clone()];
      for (j, other) in original.secondaries.iter().enumerate() {
        let mut other = other.clone();
        if index == j {
          other.message.push_str(" (this error)");
        }
        secondaries.push(other);
      }
      result.push(ExtendedError {
        primary: relocated,
        secondaries,
      });
    }

    // The relocated clones are appended after the original, keeping the
    // primary first in the output stream.
    let position = result.len() - original.secondaries.len();
    result.insert(position, original);
  }
  result
}

pub(crate) fn parse_error_diagnostic(uri: &Uri, error: &ParseError) -> Diagnostic {
  Diagnostic::error(
    DiagnosticSource::Parser,
    error.message.clone(),
    Span::new(uri.clone(), error.range),
  )
}

pub(crate) fn type_error_diagnostic(error: &ExtendedError) -> Diagnostic {
  let related = error
    .secondaries
    .iter()
    .map(|secondary| Related::new(secondary.span.clone(), secondary.message.clone()))
    .collect();
  Diagnostic::error(
    DiagnosticSource::TypeChecker,
    error.primary.message.clone(),
    error.primary.span.clone(),
  )
  .with_related(related)
}

#[cfg(test)]
mod tests {
  use super::*;
  use diagnostics::TextRange;

  fn err(start: u32, message: &str) -> TypeError {
    TypeError::new(
      Span::new(Uri::new("file:///a.tin"), TextRange::new(start, start + 1)),
      message,
    )
  }

  #[test]
  fn plain_errors_pass_through() {
    let expanded = expand_errors(vec![err(1, "undefined: x"), err(9, "undefined: y")], true);
    assert_eq!(expanded.len(), 2);
    assert!(expanded.iter().all(|e| e.secondaries.is_empty()));
  }

  #[test]
  fn continuation_attaches_and_relocates_with_related_info() {
    let expanded = expand_errors(
      vec![err(1, "redeclared"), err(9, "\tother declaration")],
      true,
    );
    assert_eq!(expanded.len(), 2);

    let original = &expanded[0];
    assert_eq!(original.primary.message, "redeclared");
    assert_eq!(original.secondaries.len(), 1);
    assert_eq!(original.secondaries[0].message, "other declaration");

    let relocated = &expanded[1];
    assert_eq!(relocated.primary.message, "redeclared (see details)");
    assert_eq!(relocated.primary.span, err(9, "").span);
    assert_eq!(relocated.secondaries.len(), 2);
    assert_eq!(relocated.secondaries[0].message, "redeclared");
    assert_eq!(
      relocated.secondaries[1].message,
      "other declaration (this error)"
    );
  }

  #[test]
  fn continuation_wording_without_related_info() {
    let expanded = expand_errors(
      vec![err(1, "redeclared"), err(9, "\tother declaration")],
      false,
    );
    assert_eq!(
      expanded[1].primary.message,
      "redeclared (this error: other declaration)"
    );
  }

  #[test]
  fn multiple_continuations_mark_their_own_location() {
    let expanded = expand_errors(
      vec![
        err(1, "ambiguous"),
        err(9, "\tcandidate a"),
        err(17, "\tcandidate b"),
      ],
      true,
    );
    assert_eq!(expanded.len(), 3);

    let second_clone = &expanded[2];
    assert_eq!(second_clone.primary.span, err(17, "").span);
    let marked: Vec<_> = second_clone
      .secondaries
      .iter()
      .filter(|s| s.message.ends_with("(this error)"))
      .collect();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0].message, "candidate b (this error)");
  }

  #[test]
  fn leading_continuation_starts_its_own_group() {
    // A continuation with no preceding primary is treated as a primary;
    // the checker should never emit this, but the expansion must not
    // panic or drop it.
    let expanded = expand_errors(vec![err(1, "\torphan")], true);
    assert_eq!(expanded.len(), 1);
    assert_eq!(expanded[0].primary.message, "\torphan");
  }

  #[test]
  fn diagnostics_carry_related_locations() {
    let expanded = expand_errors(
      vec![err(1, "redeclared"), err(9, "\tother declaration")],
      true,
    );
    let diag = type_error_diagnostic(&expanded[0]);
    assert_eq!(diag.message, "redeclared");
    assert_eq!(diag.related.len(), 1);
    assert_eq!(diag.related[0].span, err(9, "").span);
  }
}
