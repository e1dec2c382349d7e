use diagnostics::{Diagnostic, DiagnosticSource, Related, Span, TextRange, Uri};

fn main() {
  let uri = Uri::new("file:///w/example/example.tin");

  let diagnostic = Diagnostic::error(
    DiagnosticSource::TypeChecker,
    "answer redeclared in this block",
    Span::new(uri.clone(), TextRange::new(6, 12)),
  )
  .with_related(vec![Related::new(
    Span::new(uri, TextRange::new(40, 46)),
    "other declaration of answer",
  )]);

  println!("{diagnostic}");
  for related in &diagnostic.related {
    println!("  {}: {}", related.span, related.message);
  }
}
