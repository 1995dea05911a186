//! Dispatch executor - routes inbound messages into handler invocations
//!
//! The executor is driven from the delivery task of a subscription. Binding
//! happens there, synchronously; the handler body always runs on its own
//! spawned task. Delivery tasks belong to the messaging client and must
//! never be blocked by user code, which may itself suspend or publish back
//! into the client.
//!
//! Dispatch order follows delivery order per subscription, but handler
//! completion order across messages is not guaranteed: this layer provides
//! ordered dispatch, not ordered completion. Services that need strictly
//! ordered side effects must serialize in their own handler.

use std::sync::Arc;

use crate::binder;
use crate::codec;
use crate::connection::Connection;
use crate::error::Error;
use crate::handler::HandlerSet;
use crate::message::InboundMessage;
use crate::metrics::MetricsSink;

/// Which handler consumes a given message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectedRole {
    OnMessage,
    OnRequest,
}

/// Select the handler role for an inbound message.
///
/// A reply-capable message prefers on_request only when the service actually
/// implements it; otherwise delivery falls back to on_message even when a
/// reply address is present. A service implementing only on_request consumes
/// reply-less messages too; the return value is dropped for lack of a reply
/// address.
pub(crate) fn select_role(msg: &InboundMessage, handlers: &HandlerSet) -> Option<SelectedRole> {
    if msg.expects_reply() && handlers.has_on_request() {
        return Some(SelectedRole::OnRequest);
    }
    if handlers.has_on_message() {
        return Some(SelectedRole::OnMessage);
    }
    if handlers.has_on_request() {
        return Some(SelectedRole::OnRequest);
    }
    None
}

/// Per-registration dispatch state, shared with the delivery pump task
pub(crate) struct DispatchExecutor {
    pub(crate) service: String,
    pub(crate) subject: String,
    pub(crate) handlers: HandlerSet,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) validation: bool,
}

impl DispatchExecutor {
    /// Process one inbound message to its terminal outcome.
    ///
    /// Called on the delivery task; only binding happens here. The handler
    /// invocation is spawned.
    pub(crate) fn dispatch(self: Arc<Self>, msg: InboundMessage) {
        self.metrics
            .message_consumed(&msg.subject, msg.payload.len());

        let Some(role) = select_role(&msg, &self.handlers) else {
            // Attach rejects empty handler sets; this covers executors
            // constructed without going through attach.
            tracing::error!(
                service = %self.service,
                subject = %msg.subject,
                "no handler available for inbound message"
            );
            self.metrics.consumer_error(&msg.subject, "contract");
            return;
        };

        match role {
            SelectedRole::OnMessage => self.invoke_on_message(msg),
            SelectedRole::OnRequest => self.invoke_on_request(msg),
        }
    }

    fn invoke_on_message(self: Arc<Self>, msg: InboundMessage) {
        let Some(handler) = self.handlers.on_message.clone() else {
            return;
        };
        let args = match binder::bind(&msg, &handler.signature, None, self.validation) {
            Ok(args) => args,
            Err(e) => {
                self.dispatch_error(msg, Arc::new(e));
                return;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = (handler.invoke)(args).await {
                self.dispatch_error(msg, Arc::new(e));
            }
        });
    }

    fn invoke_on_request(self: Arc<Self>, msg: InboundMessage) {
        let Some(handler) = self.handlers.on_request.clone() else {
            return;
        };
        let args = match binder::bind(&msg, &handler.signature, None, self.validation) {
            Ok(args) => args,
            Err(e) => {
                self.dispatch_error(msg, Arc::new(e));
                return;
            }
        };

        tokio::spawn(async move {
            match (handler.invoke)(args).await {
                Ok(reply) => self.publish_reply(&msg, reply).await,
                Err(e) => self.dispatch_error(msg, Arc::new(e)),
            }
        });
    }

    async fn publish_reply(&self, msg: &InboundMessage, reply: codec::Value) {
        // A nil reply, or a reply with nowhere to go, is dropped.
        if reply.is_null() {
            return;
        }
        let Some(reply_to) = msg.reply_to.as_deref().filter(|r| !r.is_empty()) else {
            tracing::debug!(
                service = %self.service,
                subject = %msg.subject,
                "dropping reply value: message has no reply address"
            );
            return;
        };

        let payload = codec::encode(&reply);
        let bytes = payload.len();
        match self.connection.publish(reply_to, payload, None).await {
            Ok(()) => self.metrics.message_published(reply_to, bytes),
            Err(e) => {
                tracing::error!(
                    service = %self.service,
                    subject = %msg.subject,
                    error = %e,
                    "failed to publish reply"
                );
                self.metrics.producer_error(reply_to, e.category());
            }
        }
    }

    /// Route a failure through on_error when present; otherwise the failure
    /// is observed and the message is considered consumed. Redelivery, if
    /// any, belongs to the streaming client, not this layer.
    fn dispatch_error(self: Arc<Self>, msg: InboundMessage, cause: Arc<Error>) {
        self.metrics.consumer_error(&msg.subject, cause.category());

        let Some(handler) = self.handlers.on_error.clone() else {
            tracing::error!(
                service = %self.service,
                subject = %msg.subject,
                error = %cause,
                "handler failed and no on_error handler is attached"
            );
            return;
        };

        // The constraint pass is skipped on the error path: the error
        // handler should see the message that failed, not fail the same way.
        let args = match binder::bind(&msg, &handler.signature, Some(cause.clone()), false) {
            Ok(args) => args,
            Err(e) => {
                tracing::error!(
                    service = %self.service,
                    subject = %msg.subject,
                    error = %e,
                    "could not bind arguments for on_error"
                );
                return;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = (handler.invoke)(args).await {
                // Terminal: observed, never escalated to a process exit.
                tracing::error!(
                    service = %self.service,
                    subject = %msg.subject,
                    original = %cause,
                    error = %e,
                    "on_error handler itself failed"
                );
                self.metrics.consumer_error(&msg.subject, e.category());
            }
        });
    }
}
