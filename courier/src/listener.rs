//! Listener - owns the connection, the service registrations and their
//! lifecycle
//!
//! One listener holds one connection and any number of attached services,
//! keyed by service type name. State moves monotonically through
//! Running -> Draining -> Stopped (or straight to Stopped); there is no way
//! back, and only one stop operation can be in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::connection::{Connection, SubscriptionId};
use crate::dispatch::DispatchExecutor;
use crate::error::{Error, LifecycleErrorKind, Result};
use crate::message::InboundMessage;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::service::MessagingService;

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Running,
    Draining,
    Stopped,
}

struct ServiceRegistration {
    subject: String,
    subscription: SubscriptionId,
    pump: tokio::task::JoinHandle<()>,
}

/// Binds services to subjects over one messaging connection
pub struct Listener {
    connection: Arc<dyn Connection>,
    metrics: Arc<dyn MetricsSink>,
    registrations: DashMap<String, ServiceRegistration>,
    state: std::sync::Mutex<ListenerState>,
    /// Serializes stop operations; a second stop observes Stopped and errors
    stop_gate: tokio::sync::Mutex<()>,
    stopped: tokio::sync::Notify,
}

impl Listener {
    /// Create a listener over an established connection
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::with_metrics(connection, Arc::new(NoopMetrics))
    }

    /// Create a listener with an observability sink
    pub fn with_metrics(connection: Arc<dyn Connection>, metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.connection_opened(connection.url());
        Self {
            connection,
            metrics,
            registrations: DashMap::new(),
            state: std::sync::Mutex::new(ListenerState::Running),
            stop_gate: tokio::sync::Mutex::new(()),
            stopped: tokio::sync::Notify::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(ListenerState::Stopped)
    }

    fn set_state(&self, next: ListenerState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = next;
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ListenerState::Running => Ok(()),
            state => Err(Error::lifecycle(
                LifecycleErrorKind::AlreadyClosed,
                format!("listener is {state:?}"),
            )),
        }
    }

    /// Attach a service: derive its subject, create the subscription and
    /// start the delivery pump.
    ///
    /// One registration per service type name; attaching a second service of
    /// the same declared type is an error.
    pub async fn attach<S: MessagingService>(&self, service: S) -> Result<()> {
        self.ensure_running()?;

        let name = service.name();
        if self.registrations.contains_key(name) {
            return Err(Error::configuration(
                format!("service '{name}' is already attached"),
                None,
            ));
        }

        let config = service.config();
        let handlers = service.handlers();
        if !handlers.is_consumable() {
            return Err(Error::configuration(
                format!("service '{name}' must implement on_message or on_request"),
                None,
            ));
        }

        let subject = config
            .subject
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| (!name.is_empty()).then(|| name.to_string()))
            .ok_or_else(|| {
                Error::configuration(
                    format!("no subject could be derived for service '{name}'"),
                    Some("subject".to_string()),
                )
            })?;

        let handle = self
            .connection
            .subscribe(&subject, config.queue_group.as_deref(), config.max_pending)
            .await?;
        let subscription_id = handle.id;
        let mut receiver = handle.receiver;

        let executor = Arc::new(DispatchExecutor {
            service: name.to_string(),
            subject: subject.clone(),
            handlers,
            connection: self.connection.clone(),
            metrics: self.metrics.clone(),
            validation: config.validation,
        });

        // The pump is the delivery task: it feeds the executor in delivery
        // order and must stay responsive, so the executor only binds here
        // and spawns each invocation.
        let pump_subject = subject.clone();
        let pump = tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                Arc::clone(&executor).dispatch(msg);
            }
            tracing::debug!(subject = %pump_subject, "delivery pump stopped");
        });

        let registration = ServiceRegistration {
            subject: subject.clone(),
            subscription: subscription_id,
            pump,
        };

        // A racing attach of the same type may have won while we were
        // subscribing; roll the fresh subscription back in that case. The
        // entry guard is dropped before any await.
        let lost_race = match self.registrations.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Some(registration),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(registration);
                None
            }
        };
        if let Some(registration) = lost_race {
            let _ = self.connection.unsubscribe(registration.subscription).await;
            registration.pump.abort();
            return Err(Error::configuration(
                format!("service '{name}' is already attached"),
                None,
            ));
        }

        self.metrics.subscribed(&subject);
        tracing::info!(service = %name, subject = %subject, "service attached");
        Ok(())
    }

    /// Detach one service and cancel its subscription.
    ///
    /// In-flight handler invocations already spawned keep running; only
    /// future deliveries stop.
    pub async fn detach(&self, service_name: &str) -> Result<()> {
        let (_, registration) = self.registrations.remove(service_name).ok_or_else(|| {
            Error::configuration(
                format!("cannot find subscription configuration for service '{service_name}'"),
                None,
            )
        })?;

        if let Err(e) = self.connection.unsubscribe(registration.subscription).await {
            tracing::warn!(service = %service_name, error = %e, "unsubscribe failed during detach");
        }
        registration.pump.abort();
        self.metrics.unsubscribed(&registration.subject);
        tracing::info!(service = %service_name, subject = %registration.subject, "service detached");
        Ok(())
    }

    /// Stop now: cancel every subscription and force-close the connection
    /// without waiting for in-flight handler invocations.
    pub async fn stop_immediate(&self) -> Result<()> {
        let _gate = self.stop_gate.lock().await;
        if self.state() == ListenerState::Stopped {
            return Err(Error::lifecycle(
                LifecycleErrorKind::AlreadyClosed,
                "listener already stopped",
            ));
        }
        self.set_state(ListenerState::Stopped);

        self.teardown_registrations(true).await;

        let result = self.connection.close().await;
        self.metrics.connection_closed(self.connection.url());
        self.stopped.notify_waiters();
        tracing::info!("listener stopped (immediate)");
        result
    }

    /// Stop gracefully: cancel every subscription, then drain the
    /// connection (flush in-flight deliveries, then close), bounded by
    /// `timeout` when given.
    pub async fn stop_graceful(&self, timeout: Option<Duration>) -> Result<()> {
        let _gate = self.stop_gate.lock().await;
        if self.state() == ListenerState::Stopped {
            return Err(Error::lifecycle(
                LifecycleErrorKind::AlreadyClosed,
                "listener already stopped",
            ));
        }
        self.set_state(ListenerState::Draining);

        // Pumps are left running so queued deliveries flush; they end when
        // the client drops their channels.
        self.teardown_registrations(false).await;

        let result = self.connection.drain(timeout).await;
        self.set_state(ListenerState::Stopped);
        self.metrics.connection_closed(self.connection.url());
        self.stopped.notify_waiters();
        tracing::info!("listener stopped (graceful)");
        result
    }

    /// Cancel all registrations. Snapshot the keys first so removal never
    /// races the iteration.
    async fn teardown_registrations(&self, abort_pumps: bool) {
        let names: Vec<String> = self
            .registrations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            if let Some((_, registration)) = self.registrations.remove(&name) {
                if let Err(e) = self.connection.unsubscribe(registration.subscription).await {
                    tracing::debug!(service = %name, error = %e, "unsubscribe during stop");
                }
                if abort_pumps {
                    registration.pump.abort();
                }
                self.metrics.unsubscribed(&registration.subject);
            }
        }
    }

    /// Block until the listener is stopped. This is the process-lifetime
    /// anchor for binaries whose only job is to run attached services.
    pub async fn run_until_stopped(&self) {
        loop {
            if self.state() == ListenerState::Stopped {
                return;
            }
            // Periodic re-check so a stop between the state read and the
            // wait cannot be missed.
            let _ = tokio::time::timeout(Duration::from_millis(100), self.stopped.notified()).await;
        }
    }

    /// Publish raw payload bytes to a subject
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_running()?;
        let bytes = payload.len();
        match self.connection.publish(subject, payload, None).await {
            Ok(()) => {
                self.metrics.message_published(subject, bytes);
                Ok(())
            }
            Err(e) => {
                self.metrics.producer_error(subject, e.category());
                Err(e)
            }
        }
    }

    /// Publish and await a single reply
    pub async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<InboundMessage> {
        self.ensure_running()?;
        let bytes = payload.len();
        match self.connection.request(subject, payload).await {
            Ok(reply) => {
                self.metrics.message_published(subject, bytes);
                Ok(reply)
            }
            Err(e) => {
                self.metrics.producer_error(subject, e.category());
                Err(e)
            }
        }
    }

    /// Number of currently attached services
    pub fn attached_services(&self) -> usize {
        self.registrations.len()
    }

    /// Whether a service of this type name is attached
    pub fn is_attached(&self, service_name: &str) -> bool {
        self.registrations.contains_key(service_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TargetType;
    use crate::connection::LoopbackConnection;
    use crate::handler::{HandlerSet, HandlerSignature, ParamSpec, ReturnClass};
    use crate::service::ConsumerConfig;
    use uuid::Uuid;

    struct NullService {
        name: &'static str,
        subject: Option<String>,
    }

    impl MessagingService for NullService {
        fn name(&self) -> &'static str {
            self.name
        }

        fn config(&self) -> ConsumerConfig {
            ConsumerConfig {
                subject: self.subject.clone(),
                ..ConsumerConfig::default()
            }
        }

        fn handlers(&self) -> HandlerSet {
            HandlerSet::builder()
                .on_message(
                    HandlerSignature::new(
                        vec![ParamSpec::payload(TargetType::Bytes)],
                        ReturnClass::ErrorOrNone,
                    ),
                    |_args| async { Ok(()) },
                )
                .build()
        }
    }

    fn listener(tag: &str) -> Listener {
        let conn = LoopbackConnection::connect(&format!("{tag}-{}", Uuid::new_v4())).unwrap();
        Listener::new(Arc::new(conn))
    }

    #[tokio::test]
    async fn attach_derives_subject_from_name() {
        let listener = listener("derive");
        listener
            .attach(NullService {
                name: "OrderService",
                subject: None,
            })
            .await
            .unwrap();
        assert!(listener.is_attached("OrderService"));
    }

    #[tokio::test]
    async fn duplicate_attach_rejected() {
        let listener = listener("dup");
        listener
            .attach(NullService {
                name: "Svc",
                subject: Some("a".into()),
            })
            .await
            .unwrap();

        let err = listener
            .attach(NullService {
                name: "Svc",
                subject: Some("b".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(listener.attached_services(), 1);
    }

    #[tokio::test]
    async fn empty_handler_set_rejected() {
        struct Empty;
        impl MessagingService for Empty {
            fn name(&self) -> &'static str {
                "Empty"
            }
            fn handlers(&self) -> HandlerSet {
                HandlerSet::builder().build()
            }
        }

        let listener = listener("empty");
        let err = listener.attach(Empty).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn detach_removes_registration_and_second_detach_errors() {
        let listener = listener("detach");
        listener
            .attach(NullService {
                name: "Svc",
                subject: None,
            })
            .await
            .unwrap();

        listener.detach("Svc").await.unwrap();
        assert!(!listener.is_attached("Svc"));

        let err = listener.detach("Svc").await.unwrap_err();
        match err {
            Error::Configuration { message, .. } => {
                assert!(message.contains("cannot find subscription configuration"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn graceful_stop_on_stopped_listener_errors() {
        let listener = listener("double-stop");
        listener.stop_graceful(None).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);

        let err = listener.stop_graceful(None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                kind: LifecycleErrorKind::AlreadyClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn immediate_stop_then_graceful_stop_errors() {
        let listener = listener("imm");
        listener
            .attach(NullService {
                name: "Svc",
                subject: None,
            })
            .await
            .unwrap();

        listener.stop_immediate().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.attached_services(), 0);

        let err = listener.stop_immediate().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                kind: LifecycleErrorKind::AlreadyClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn run_until_stopped_returns_after_stop() {
        let listener = Arc::new(listener("run"));

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.run_until_stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.stop_immediate().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("run_until_stopped did not return")
            .unwrap();
    }

    #[tokio::test]
    async fn publish_after_stop_errors() {
        let listener = listener("pub-stop");
        listener.stop_immediate().await.unwrap();
        let err = listener.publish("x", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));
    }
}
