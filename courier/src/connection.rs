//! Messaging client boundary - connection trait and in-process loopback
//!
//! The real wire client (connection management, reconnect, framing, TLS)
//! lives outside this crate and is consumed through [`Connection`]. The
//! [`LoopbackConnection`] is an in-process broker over named buses, enough
//! to run services end-to-end in tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::{Error, LifecycleErrorKind, Result};
use crate::message::{is_publishable_subject, subject_matches, InboundMessage};

/// Identifier of one active subscription
pub type SubscriptionId = Uuid;

/// Handle returned by [`Connection::subscribe`]: the id for teardown plus
/// the delivery channel the client feeds
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<InboundMessage>,
}

/// The external messaging client, reduced to the capabilities this crate
/// consumes. Reliable delivery once connected; reconnection and backoff are
/// entirely the implementor's concern.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Connection url, used for observation tagging
    fn url(&self) -> &str;

    /// Publish payload bytes to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>, reply_to: Option<&str>)
        -> Result<()>;

    /// Publish and await a single reply
    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<InboundMessage>;

    /// Create a subscription; messages arrive on the handle's channel
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        pending_limit: usize,
    ) -> Result<SubscriptionHandle>;

    /// Cancel one subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Stop accepting new work, flush in-flight deliveries, then close
    async fn drain(&self, timeout: Option<Duration>) -> Result<()>;

    /// Close immediately without flushing
    async fn close(&self) -> Result<()>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct SubEntry {
    id: SubscriptionId,
    subject: String,
    queue_group: Option<String>,
    sender: mpsc::Sender<InboundMessage>,
}

/// Shared in-process bus, one per name
struct LoopbackBus {
    subscriptions: RwLock<Vec<SubEntry>>,
    round_robin: AtomicUsize,
}

impl LoopbackBus {
    fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Deliver to every matching plain subscription and one member of each
    /// matching queue group. Returns the number of deliveries.
    async fn publish(&self, msg: InboundMessage) -> Result<usize> {
        // Senders are cloned out so no lock is held across channel sends.
        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let subs = self.subscriptions.read().await;
            let mut plain = Vec::new();
            let mut groups: HashMap<&str, Vec<&SubEntry>> = HashMap::new();
            for entry in subs.iter() {
                if !subject_matches(&msg.subject, &entry.subject) {
                    continue;
                }
                match entry.queue_group.as_deref() {
                    Some(group) => groups.entry(group).or_default().push(entry),
                    None => plain.push(entry.sender.clone()),
                }
            }
            for members in groups.values() {
                let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % members.len();
                plain.push(members[idx].sender.clone());
            }
            plain
        };

        let mut delivered = 0;
        for sender in targets {
            if sender.send(msg.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn add(&self, entry: SubEntry) {
        self.subscriptions.write().await.push(entry);
    }

    async fn remove(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|entry| entry.id != id);
        subs.len() != before
    }

    /// Whether every listed subscription's channel is fully drained
    async fn idle(&self, ids: &[SubscriptionId]) -> bool {
        let subs = self.subscriptions.read().await;
        subs.iter()
            .filter(|entry| ids.contains(&entry.id))
            .all(|entry| entry.sender.capacity() == entry.sender.max_capacity())
    }
}

/// Registry of named buses so independent connections can meet in-process
static BUSES: once_cell::sync::Lazy<std::sync::Mutex<HashMap<String, Arc<LoopbackBus>>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn bus_for(name: &str) -> Result<Arc<LoopbackBus>> {
    let mut buses = BUSES
        .lock()
        .map_err(|_| Error::connection_setup_msg("loopback bus registry poisoned"))?;
    Ok(buses
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(LoopbackBus::new()))
        .clone())
}

/// In-process connection over a named loopback bus
pub struct LoopbackConnection {
    url: String,
    bus: Arc<LoopbackBus>,
    own: std::sync::Mutex<Vec<SubscriptionId>>,
    closed: AtomicBool,
    draining: AtomicBool,
}

impl LoopbackConnection {
    /// Connect to (or create) the named in-process bus
    pub fn connect(bus_name: &str) -> Result<Self> {
        if bus_name.is_empty() {
            return Err(Error::connection_setup_msg("bus name must not be empty"));
        }
        let bus = bus_for(bus_name)?;
        tracing::debug!("loopback connection opened on bus '{}'", bus_name);
        Ok(Self {
            url: format!("mem://{bus_name}"),
            bus,
            own: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_msg("connection is closed"));
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        self.ensure_open()?;
        if self.draining.load(Ordering::SeqCst) {
            return Err(Error::connection_msg("connection is draining"));
        }
        Ok(())
    }

    fn own_ids(&self) -> Vec<SubscriptionId> {
        self.own.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    async fn close_inner(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for id in self.own_ids() {
            self.bus.remove(id).await;
        }
        if let Ok(mut ids) = self.own.lock() {
            ids.clear();
        }
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        reply_to: Option<&str>,
    ) -> Result<()> {
        self.ensure_accepting()?;
        if !is_publishable_subject(subject) {
            return Err(Error::configuration(
                format!("cannot publish to subject '{subject}'"),
                Some("subject".to_string()),
            ));
        }
        let msg = match reply_to {
            Some(reply) => InboundMessage::with_reply(subject, reply, payload),
            None => InboundMessage::new(subject, payload),
        };
        self.bus.publish(msg).await?;
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<InboundMessage> {
        self.ensure_accepting()?;
        let inbox = format!("_INBOX.{}", Uuid::new_v4());
        let mut handle = self.subscribe(&inbox, None, 1).await?;

        let msg = InboundMessage::with_reply(subject, inbox.clone(), payload);
        let delivered = self.bus.publish(msg).await?;
        if delivered == 0 {
            self.unsubscribe(handle.id).await?;
            return Err(Error::connection_msg(format!(
                "no responders for subject '{subject}'"
            )));
        }

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, handle.receiver.recv()).await;
        let _ = self.unsubscribe(handle.id).await;
        match reply {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(Error::connection_msg("reply channel closed")),
            Err(_) => Err(Error::timeout(
                format!("request on '{subject}'"),
                REQUEST_TIMEOUT.as_millis() as u64,
            )),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        pending_limit: usize,
    ) -> Result<SubscriptionHandle> {
        self.ensure_accepting()?;
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(pending_limit.max(1));
        self.bus
            .add(SubEntry {
                id,
                subject: subject.to_string(),
                queue_group: queue_group.map(str::to_string),
                sender,
            })
            .await;
        if let Ok(mut ids) = self.own.lock() {
            ids.push(id);
        }
        tracing::debug!("subscribed {} on '{}'", id, subject);
        Ok(SubscriptionHandle { id, receiver })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.ensure_open()?;
        if !self.bus.remove(id).await {
            return Err(Error::configuration(
                format!("no active subscription with id {id}"),
                None,
            ));
        }
        if let Ok(mut ids) = self.own.lock() {
            ids.retain(|own| *own != id);
        }
        Ok(())
    }

    async fn drain(&self, timeout: Option<Duration>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::lifecycle(
                LifecycleErrorKind::AlreadyClosed,
                "cannot drain a closed connection",
            ));
        }
        self.draining.store(true, Ordering::SeqCst);

        let started = tokio::time::Instant::now();
        let ids = self.own_ids();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                // Someone force-closed the connection underneath the drain
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Interrupted,
                    "connection closed while draining",
                ));
            }
            if self.bus.idle(&ids).await {
                break;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(Error::lifecycle(
                        LifecycleErrorKind::DrainTimeout,
                        format!("drain did not complete within {limit:?}"),
                    ));
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.close_inner().await;
        tracing::debug!("loopback connection drained and closed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::lifecycle(
                LifecycleErrorKind::AlreadyClosed,
                "connection already closed",
            ));
        }
        self.close_inner().await;
        tracing::debug!("loopback connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_bus(tag: &str) -> String {
        format!("{tag}-{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscription() {
        let conn = LoopbackConnection::connect(&unique_bus("pub")).unwrap();
        let mut sub = conn.subscribe("orders.*", None, 8).await.unwrap();

        conn.publish("orders.created", b"hi".to_vec(), None)
            .await
            .unwrap();

        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.subject, "orders.created");
        assert_eq!(msg.payload, b"hi");
    }

    #[tokio::test]
    async fn queue_group_delivers_to_one_member() {
        let conn = LoopbackConnection::connect(&unique_bus("queue")).unwrap();
        let mut a = conn.subscribe("jobs", Some("workers"), 8).await.unwrap();
        let mut b = conn.subscribe("jobs", Some("workers"), 8).await.unwrap();

        for i in 0..4u8 {
            conn.publish("jobs", vec![i], None).await.unwrap();
        }

        // Round-robin: each member sees exactly half
        let mut got_a = 0;
        let mut got_b = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(100), a.receiver.recv()).await
        {
            got_a += 1;
        }
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(100), b.receiver.recv()).await
        {
            got_b += 1;
        }
        assert_eq!(got_a + got_b, 4);
        assert!(got_a > 0 && got_b > 0);
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let conn = Arc::new(LoopbackConnection::connect(&unique_bus("req")).unwrap());
        let mut sub = conn.subscribe("echo", None, 8).await.unwrap();

        let responder = conn.clone();
        tokio::spawn(async move {
            if let Some(msg) = sub.receiver.recv().await {
                let reply_to = msg.reply_to.unwrap();
                responder
                    .publish(&reply_to, msg.payload, None)
                    .await
                    .unwrap();
            }
        });

        let reply = conn.request("echo", b"ping".to_vec()).await.unwrap();
        assert_eq!(reply.payload, b"ping");
    }

    #[tokio::test]
    async fn request_without_responders_fails_fast() {
        let conn = LoopbackConnection::connect(&unique_bus("lonely")).unwrap();
        let err = conn.request("nobody.home", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn wildcard_subjects_are_not_publishable() {
        let conn = LoopbackConnection::connect(&unique_bus("wild")).unwrap();
        let err = conn.publish("orders.*", vec![], None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn double_close_reports_already_closed() {
        let conn = LoopbackConnection::connect(&unique_bus("close")).unwrap();
        conn.close().await.unwrap();
        let err = conn.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                kind: LifecycleErrorKind::AlreadyClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn drain_flushes_then_rejects_new_work() {
        let conn = LoopbackConnection::connect(&unique_bus("drain")).unwrap();
        conn.drain(Some(Duration::from_secs(1))).await.unwrap();

        let err = conn.publish("x", vec![], None).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));

        let err = conn.drain(None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                kind: LifecycleErrorKind::AlreadyClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let conn = LoopbackConnection::connect(&unique_bus("unsub")).unwrap();
        let sub = conn.subscribe("a", None, 8).await.unwrap();
        conn.unsubscribe(sub.id).await.unwrap();

        let err = conn.unsubscribe(sub.id).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
