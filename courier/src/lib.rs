//! # courier - Declarative messaging services framework
//!
//! A declarative binding from async Rust services to a messaging system
//! (publish/subscribe, request/reply, durable streams). The wire client is
//! an external collaborator consumed through the [`Connection`] trait; this
//! crate owns payload marshalling, handler dispatch and subscription
//! lifecycle, plus a compile-time validator for service declarations.
//!
//! ## Quick Start
//!
//! ### Consuming messages
//!
//! Declare handlers on an impl block with the `#[service]` macro:
//!
//! ```rust,ignore
//! use courier::{service, Envelope, Listener, LoopbackConnection, Result};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! pub struct Order {
//!     pub id: u64,
//! }
//!
//! pub struct OrderProcessor;
//!
//! #[service(subject = "orders.created", queue = "workers")]
//! impl OrderProcessor {
//!     async fn on_message(&self, msg: Envelope<Order>) -> Result<()> {
//!         println!("order {} received on {}", msg.content.id, msg.subject);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = Arc::new(LoopbackConnection::connect("demo")?);
//!     let listener = Listener::new(conn);
//!
//!     listener.attach(OrderProcessorService::new(OrderProcessor)).await?;
//!     listener.run_until_stopped().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Request/reply
//!
//! A service replies by implementing `on_request` instead; the return value
//! is encoded and published to the reply address:
//!
//! ```rust,ignore
//! pub struct Echo;
//!
//! #[service(subject = "echo")]
//! impl Echo {
//!     async fn on_request(&self, text: String) -> courier::Result<String> {
//!         Ok(text.to_uppercase())
//!     }
//! }
//! ```
//!
//! A service implements exactly one of `on_message` / `on_request` (a
//! consumer either free-runs or replies, never both) and may add `on_error`
//! to observe failed deliveries. The macro rejects anything else at compile
//! time; handler invocations always run off the client's delivery tasks.
//!
//! ## Handler shapes
//!
//! | handler | parameters | returns |
//! |---|---|---|
//! | `on_message` | `Envelope<T>` or payload `T`, or both (envelope first) | `()` or `Result<()>` |
//! | `on_request` | same as `on_message` | `T` or `Result<T>` |
//! | `on_error` | `Envelope<T>`, `Arc<Error>` | `()` or `Result<()>` |
//!
//! Read-only parameters are declared with [`Frozen`]; the bound value is
//! shared, never handed out mutably.

pub mod binder;
pub mod codec;
pub mod connection;
pub mod constraint;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod service;
pub mod stream;



// Re-exports
pub use connection::{Connection, LoopbackConnection, SubscriptionHandle, SubscriptionId};
pub use envelope::{Envelope, Frozen};
pub use error::{Error, LifecycleErrorKind, Result};
pub use handler::HandlerSet;
pub use listener::{Listener, ListenerState};
pub use message::InboundMessage;
pub use metrics::{MetricsSink, NoopMetrics, ObservationContext};
pub use service::{ConsumerConfig, MessagingService};
pub use stream::{Acker, StreamConfig, StreamManager, StreamRegistry};

// Re-export macros when feature is enabled
#[cfg(feature = "macros")]
pub use courier_macros::service;

// Re-export commonly used dependencies
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
