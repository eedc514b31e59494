//! W3C trace-context propagation through message headers.

use std::collections::HashMap;

use opentelemetry::Context;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::broker::Header;

/// Encodes `cx` as `traceparent`/`tracestate` headers.
///
/// Returns no headers when `cx` carries no valid span.
#[must_use]
pub fn inject_context(cx: &Context) -> Vec<Header> {
    let mut carrier: HashMap<String, String> = HashMap::new();
    TraceContextPropagator::new().inject_context(cx, &mut carrier);

    let mut headers: Vec<Header> = carrier
        .into_iter()
        .map(|(key, value)| Header::new(key, value))
        .collect();
    headers.sort_by(|a, b| a.key.cmp(&b.key));
    headers
}

/// Encodes the trace context of the current `tracing` span.
#[must_use]
pub fn current_context_headers() -> Vec<Header> {
    inject_context(&Span::current().context())
}

/// Decodes a remote parent context from message headers. Header names match
/// case-insensitively; values that are not UTF-8 are ignored.
#[must_use]
pub fn extract_context(headers: &[Header]) -> Context {
    let carrier: HashMap<String, String> = headers
        .iter()
        .filter_map(|h| {
            let value = String::from_utf8(h.value.clone()).ok()?;
            Some((h.key.to_lowercase(), value))
        })
        .collect();
    TraceContextPropagator::new().extract(&carrier)
}

/// Makes the trace carried by `headers` the parent of `span`.
pub fn set_parent_from_headers(span: &Span, headers: &[Header]) {
    // Fails only if the span was already started with another parent.
    let _ = span.set_parent(extract_context(headers));
}
