//! Metrics and observability collaborator
//!
//! Fire-and-forget side channel: every method defaults to a no-op and
//! nothing in the dispatch path depends on a sink call succeeding.

/// Observability sink for connection and dispatch counters.
///
/// Implementations must not block; they are called from delivery and
/// lifecycle paths.
pub trait MetricsSink: Send + Sync + 'static {
    fn connection_opened(&self, _url: &str) {}

    fn connection_closed(&self, _url: &str) {}

    fn message_published(&self, _subject: &str, _bytes: usize) {}

    fn message_consumed(&self, _subject: &str, _bytes: usize) {}

    fn subscribed(&self, _subject: &str) {}

    fn unsubscribed(&self, _subject: &str) {}

    fn producer_error(&self, _subject: &str, _category: &'static str) {}

    fn consumer_error(&self, _subject: &str, _category: &'static str) {}
}

/// Default sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Tracing context tagging observations with the connection url and subject
#[derive(Debug, Clone)]
pub struct ObservationContext {
    pub url: String,
    pub subject: String,
}

impl ObservationContext {
    pub fn new(url: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subject: subject.into(),
        }
    }

    /// Span to enter around consume/publish observations when tracing is
    /// enabled
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("courier", url = %self.url, subject = %self.subject)
    }
}
