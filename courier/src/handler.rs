//! Handler signatures and the registered handler set
//!
//! A service's handlers are resolved exactly once, at registration time,
//! into a [`HandlerSet`] with three optional slots. Nothing in the dispatch
//! path ever scans a method table again. The builder is the dynamic escape
//! hatch: it accepts signatures that never went through the static
//! validator, which is why the argument binder re-checks shape at run time.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::codec::{self, TargetType, Value};
use crate::constraint::Constraints;
use crate::envelope::{BoundEnvelope, Envelope, Frozen};
use crate::error::{Error, Result};

/// Role of one handler parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// The envelope record (content + subject + reply_to)
    Envelope,
    /// The decoded payload alone
    Payload,
    /// The causing error, second parameter of on_error only
    ErrorCause,
}

/// Return shape class of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnClass {
    /// Returns nothing
    None,
    /// Returns error or nothing (on_message / on_error)
    ErrorOrNone,
    /// Returns reply data or error (on_request)
    AnydataOrError,
}

/// One declared handler parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub role: ParamRole,
    /// Decode target: for envelope parameters this is the declared content
    /// type, for payload parameters the parameter type itself
    pub target: TargetType,
    pub readonly: bool,
    pub constraints: Option<Constraints>,
}

impl ParamSpec {
    pub fn envelope(content: TargetType) -> Self {
        Self {
            role: ParamRole::Envelope,
            target: content,
            readonly: false,
            constraints: None,
        }
    }

    pub fn payload(target: TargetType) -> Self {
        Self {
            role: ParamRole::Payload,
            target,
            readonly: false,
            constraints: None,
        }
    }

    pub fn error_cause() -> Self {
        Self {
            role: ParamRole::ErrorCause,
            target: TargetType::Any,
            readonly: false,
            constraints: None,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// Immutable description of a handler's declared shape.
///
/// Built once per service at registration time and cached in the service
/// registration.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerSignature {
    pub params: Vec<ParamSpec>,
    pub returns: ReturnClass,
}

impl HandlerSignature {
    pub fn new(params: Vec<ParamSpec>, returns: ReturnClass) -> Self {
        Self { params, returns }
    }

    /// Number of payload-role parameters
    pub fn payload_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.role == ParamRole::Payload)
            .count()
    }
}

/// A value bound for a handler parameter, owned or frozen
#[derive(Debug, Clone)]
pub enum BoundValue<T> {
    Owned(T),
    Frozen(Arc<T>),
}

impl<T> BoundValue<T> {
    pub fn get(&self) -> &T {
        match self {
            BoundValue::Owned(v) => v,
            BoundValue::Frozen(v) => v,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, BoundValue::Frozen(_))
    }
}

/// One bound handler argument, in declaration order
#[derive(Debug, Clone)]
pub enum BoundArg {
    Envelope(BoundValue<BoundEnvelope>),
    Payload(BoundValue<Value>),
    ErrorCause(Arc<Error>),
}

/// Boxed future returned by handler invocations
pub type HandlerFuture<T> = BoxFuture<'static, Result<T>>;

/// Fire-and-forget handler (on_message, on_error)
pub type MessageHandlerFn = Arc<dyn Fn(Vec<BoundArg>) -> HandlerFuture<()> + Send + Sync>;

/// Replying handler (on_request); the returned value is encoded and
/// published to the reply address
pub type RequestHandlerFn = Arc<dyn Fn(Vec<BoundArg>) -> HandlerFuture<Value> + Send + Sync>;

/// One registered handler: its cached signature plus the invocation closure
pub struct RegisteredHandler<F> {
    pub signature: HandlerSignature,
    pub invoke: F,
}

impl<F: Clone> Clone for RegisteredHandler<F> {
    fn clone(&self) -> Self {
        Self {
            signature: self.signature.clone(),
            invoke: self.invoke.clone(),
        }
    }
}

/// Typed closed set of a service's handlers, populated once at registration
#[derive(Clone, Default)]
pub struct HandlerSet {
    pub(crate) on_message: Option<RegisteredHandler<MessageHandlerFn>>,
    pub(crate) on_request: Option<RegisteredHandler<RequestHandlerFn>>,
    pub(crate) on_error: Option<RegisteredHandler<MessageHandlerFn>>,
}

impl HandlerSet {
    pub fn builder() -> HandlerSetBuilder {
        HandlerSetBuilder::default()
    }

    pub fn has_on_message(&self) -> bool {
        self.on_message.is_some()
    }

    pub fn has_on_request(&self) -> bool {
        self.on_request.is_some()
    }

    pub fn has_on_error(&self) -> bool {
        self.on_error.is_some()
    }

    /// A set with neither on_message nor on_request cannot consume anything
    pub fn is_consumable(&self) -> bool {
        self.has_on_message() || self.has_on_request()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("on_message", &self.on_message.as_ref().map(|h| &h.signature))
            .field("on_request", &self.on_request.as_ref().map(|h| &h.signature))
            .field("on_error", &self.on_error.as_ref().map(|h| &h.signature))
            .finish()
    }
}

/// Builder for handler sets constructed without the service macro.
///
/// This is the dynamic escape hatch: nothing here enforces the signature
/// rules the static validator checks, so the runtime treats builder-made
/// sets defensively.
#[derive(Default)]
pub struct HandlerSetBuilder {
    set: HandlerSet,
}

impl HandlerSetBuilder {
    pub fn on_message<F, Fut>(mut self, signature: HandlerSignature, handler: F) -> Self
    where
        F: Fn(Vec<BoundArg>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let invoke: MessageHandlerFn = Arc::new(move |args| Box::pin(handler(args)));
        self.set.on_message = Some(RegisteredHandler { signature, invoke });
        self
    }

    pub fn on_request<F, Fut>(mut self, signature: HandlerSignature, handler: F) -> Self
    where
        F: Fn(Vec<BoundArg>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let invoke: RequestHandlerFn = Arc::new(move |args| Box::pin(handler(args)));
        self.set.on_request = Some(RegisteredHandler { signature, invoke });
        self
    }

    pub fn on_error<F, Fut>(mut self, signature: HandlerSignature, handler: F) -> Self
    where
        F: Fn(Vec<BoundArg>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let invoke: MessageHandlerFn = Arc::new(move |args| Box::pin(handler(args)));
        self.set.on_error = Some(RegisteredHandler { signature, invoke });
        self
    }

    pub fn build(self) -> HandlerSet {
        self.set
    }
}

// Typed argument extraction used by generated service glue. Each helper
// takes the argument at `idx` and converts the dynamic value into the
// declared parameter type.

pub fn take_envelope<T: DeserializeOwned>(args: &mut Vec<BoundArg>, idx: usize) -> Result<Envelope<T>> {
    match take_arg(args, idx)? {
        BoundArg::Envelope(bound) => {
            let env = bound.get();
            let content = codec::from_value(env.content.clone())
                .map_err(|e| Error::contract(format!("envelope content conversion: {e}")))?;
            Ok(Envelope::new(content, env.subject.clone(), env.reply_to.clone()))
        }
        other => Err(arg_mismatch("envelope", &other, idx)),
    }
}

pub fn take_frozen_envelope<T: DeserializeOwned>(
    args: &mut Vec<BoundArg>,
    idx: usize,
) -> Result<Frozen<Envelope<T>>> {
    take_envelope(args, idx).map(Frozen::new)
}

pub fn take_payload<T: DeserializeOwned>(args: &mut Vec<BoundArg>, idx: usize) -> Result<T> {
    match take_arg(args, idx)? {
        BoundArg::Payload(bound) => codec::from_value(bound.get().clone())
            .map_err(|e| Error::contract(format!("payload conversion: {e}"))),
        other => Err(arg_mismatch("payload", &other, idx)),
    }
}

pub fn take_frozen_payload<T: DeserializeOwned>(
    args: &mut Vec<BoundArg>,
    idx: usize,
) -> Result<Frozen<T>> {
    take_payload(args, idx).map(Frozen::new)
}

pub fn take_error_cause(args: &mut Vec<BoundArg>, idx: usize) -> Result<Arc<Error>> {
    match take_arg(args, idx)? {
        BoundArg::ErrorCause(cause) => Ok(cause),
        other => Err(arg_mismatch("error cause", &other, idx)),
    }
}

// `Vec::remove` shifts later arguments; generated glue extracts in reverse
// declaration order so indices stay stable.
fn take_arg(args: &mut Vec<BoundArg>, idx: usize) -> Result<BoundArg> {
    if idx >= args.len() {
        return Err(Error::contract(format!(
            "bound argument {idx} missing ({} bound)",
            args.len()
        )));
    }
    Ok(args.remove(idx))
}

fn arg_mismatch(expected: &str, got: &BoundArg, idx: usize) -> Error {
    let kind = match got {
        BoundArg::Envelope(_) => "envelope",
        BoundArg::Payload(_) => "payload",
        BoundArg::ErrorCause(_) => "error cause",
    };
    Error::contract(format!(
        "bound argument {idx} is {kind}, handler expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_sig() -> HandlerSignature {
        HandlerSignature::new(
            vec![ParamSpec::envelope(TargetType::Any)],
            ReturnClass::ErrorOrNone,
        )
    }

    #[test]
    fn builder_populates_slots_once() {
        let set = HandlerSet::builder()
            .on_message(message_sig(), |_args| async { Ok(()) })
            .build();

        assert!(set.has_on_message());
        assert!(!set.has_on_request());
        assert!(!set.has_on_error());
        assert!(set.is_consumable());
    }

    #[test]
    fn empty_set_is_not_consumable() {
        let set = HandlerSet::builder().build();
        assert!(!set.is_consumable());
    }

    #[test]
    fn payload_param_count() {
        let sig = HandlerSignature::new(
            vec![
                ParamSpec::payload(TargetType::String),
                ParamSpec::payload(TargetType::Int),
            ],
            ReturnClass::None,
        );
        assert_eq!(sig.payload_params(), 2);
    }

    #[tokio::test]
    async fn typed_extraction() {
        let mut args = vec![
            BoundArg::Envelope(BoundValue::Owned(BoundEnvelope {
                content: Value::Json(serde_json::json!({"id": 1})),
                subject: "orders".into(),
                reply_to: None,
            })),
            BoundArg::Payload(BoundValue::Owned(Value::String("x".into()))),
        ];

        // Reverse declaration order keeps indices stable across removal.
        let payload: String = take_payload(&mut args, 1).unwrap();
        assert_eq!(payload, "x");

        let env: Envelope<serde_json::Value> = take_envelope(&mut args, 0).unwrap();
        assert_eq!(env.subject, "orders");
        assert_eq!(env.content, serde_json::json!({"id": 1}));
    }

    #[test]
    fn mismatched_extraction_is_a_contract_error() {
        let mut args = vec![BoundArg::Payload(BoundValue::Owned(Value::Null))];
        let err = take_error_cause(&mut args, 0).unwrap_err();
        assert!(matches!(err, Error::Contract { .. }));
    }
}
