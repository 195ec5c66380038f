//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Create a span covering one call to `iterate`.
#[inline]
pub fn span_iterate(scheduler: &str) -> Span {
    span!(Level::DEBUG, "iterate", scheduler = %scheduler)
}

/// Create a span for element code running on a cothread.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::observability::span_element;
///
/// let span = span_element("sched", "identity0", "push");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_element(scheduler: &str, element: &str, capability: &str) -> Span {
    span!(
        Level::DEBUG,
        "element",
        scheduler = %scheduler,
        element = %element,
        capability = %capability
    )
}

/// Create a span for a pipeline controller.
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Instrument one `iterate` call.
pub fn instrument_iterate(scheduler: &str) -> tracing::span::EnteredSpan {
    span_iterate(scheduler).entered()
}

/// Log an element failure.
#[inline]
pub fn trace_error(scheduler: &str, element: &str, error: &dyn std::error::Error) {
    tracing::error!(
        scheduler = %scheduler,
        element = %element,
        error = %error,
        "element failed"
    );
}

/// Log end-of-stream.
#[inline]
pub fn trace_eos(scheduler: &str, element: &str) {
    tracing::info!(
        scheduler = %scheduler,
        element = %element,
        "end of stream"
    );
}

/// Log pipeline state change.
#[inline]
pub fn trace_state_change(pipeline: &str, from: &str, to: &str) {
    tracing::info!(
        pipeline = %pipeline,
        from = %from,
        to = %to,
        "pipeline state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_create() {
        let _iterate = instrument_iterate("sched");
        let _element = span_element("sched", "src", "pull").entered();
        let _pipeline = span_pipeline("pipe").entered();
    }

    #[test]
    fn test_trace_helpers() {
        let err = crate::Error::Flow("boom".into());
        trace_error("sched", "src", &err);
        trace_eos("sched", "src");
        trace_state_change("pipe", "Paused", "Playing");
    }
}
