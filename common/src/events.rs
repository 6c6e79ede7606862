/// Narrow observer interface for search lifecycle events. The default no-op implementation
/// means callers that don't care about telemetry pay nothing; a deployment that wants
/// metrics implements this once and injects it into the search engine.
pub trait EventSink: Send + Sync {
    fn on_search_started(&self, _query: &str) {}
    fn on_search_completed(&self, _query: &str, _result_count: usize) {}
    fn on_search_error(&self, _query: &str, _error: &str) {}
}

#[derive(Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}
