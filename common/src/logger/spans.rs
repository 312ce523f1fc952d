use tracing::{Span, field};

use super::TraceId;

/// Root span for a replay run / batch job.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id,
        symbol = field::Empty
    )
}

/// Child span; inherits `trace_id` from the enclosing root span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("child", name = %name, symbol = field::Empty)
}

/// Records the symbol on the current span, if the span declares the field.
pub fn annotate_span(symbol: &str) {
    Span::current().record("symbol", field::display(symbol));
}
