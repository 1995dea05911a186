//! Service trait and consumer configuration

use crate::handler::HandlerSet;

/// Per-service consumer configuration, normally supplied by the service
/// attribute and falling back to defaults
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Subject to subscribe on; when absent the service name is used
    pub subject: Option<String>,

    /// Queue group for load-balanced delivery
    pub queue_group: Option<String>,

    /// Capacity of the delivery channel between the client and the
    /// dispatcher
    pub max_pending: usize,

    /// Whether to run the constraint pass over bound values
    pub validation: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            subject: None,
            queue_group: None,
            max_pending: 4096,
            validation: true,
        }
    }
}

/// A messaging service that can be attached to a listener.
///
/// Implementations are normally generated by the `#[service]` attribute;
/// hand-written implementations are the dynamic escape hatch, and their
/// handler signatures are re-checked at bind time.
pub trait MessagingService: Send + Sync + 'static {
    /// Declared service type name; also the default subject
    fn name(&self) -> &'static str;

    /// Consumer configuration for this service
    fn config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
    }

    /// Resolve the handler set. Called exactly once, at attach time.
    fn handlers(&self) -> HandlerSet;
}
