//! Argument binder - builds the ordered argument list for a handler
//!
//! Binding runs synchronously on the delivery task, before the handler is
//! handed off to its own task, so it must complete in bounded time: decode,
//! optional constraint check, nothing else. No I/O, no awaiting.

use std::sync::Arc;

use crate::codec::{self, TargetType, Value};
use crate::constraint;
use crate::envelope::BoundEnvelope;
use crate::error::{Error, Result};
use crate::handler::{BoundArg, BoundValue, HandlerSignature, ParamRole};
use crate::message::InboundMessage;

/// Bind an inbound message to a handler signature.
///
/// `cause` is the causing error when binding for the on_error role; it must
/// be `None` for on_message/on_request signatures.
pub fn bind(
    msg: &InboundMessage,
    signature: &HandlerSignature,
    cause: Option<Arc<Error>>,
    validate: bool,
) -> Result<Vec<BoundArg>> {
    // Runtime backstops: the static validator rejects these shapes, but a
    // builder-constructed set can still carry them.
    if signature.payload_params() > 1 {
        return Err(Error::contract(
            "handler signature declares more than one payload parameter",
        ));
    }
    if signature.params.len() > 2 {
        return Err(Error::contract(
            "handler signature declares more than two parameters",
        ));
    }

    let mut args = Vec::with_capacity(signature.params.len());
    for param in &signature.params {
        match param.role {
            ParamRole::Envelope => {
                let content = decode_content(msg, &param.target, cause.is_some())?;
                if validate {
                    check_constraints(msg, &content, param.constraints.as_ref())?;
                }
                let envelope = BoundEnvelope {
                    content,
                    subject: msg.subject.clone(),
                    reply_to: msg.reply_to.clone(),
                };
                let bound = if param.readonly || matches!(param.target, TargetType::Readonly(_)) {
                    BoundValue::Frozen(Arc::new(envelope))
                } else {
                    BoundValue::Owned(envelope)
                };
                args.push(BoundArg::Envelope(bound));
            }
            ParamRole::Payload => {
                let value = codec::decode(msg.payload.clone(), &param.target)
                    .map_err(|e| Error::payload_binding(msg.subject.clone(), e))?;
                if validate {
                    check_constraints(msg, &value, param.constraints.as_ref())?;
                }
                let bound = if param.readonly || matches!(param.target, TargetType::Readonly(_)) {
                    BoundValue::Frozen(Arc::new(value))
                } else {
                    BoundValue::Owned(value)
                };
                args.push(BoundArg::Payload(bound));
            }
            ParamRole::ErrorCause => {
                let cause = cause.clone().ok_or_else(|| {
                    Error::contract("error-cause parameter bound outside the on_error role")
                })?;
                args.push(BoundArg::ErrorCause(cause));
            }
        }
    }

    Ok(args)
}

/// Decode the envelope content. During error dispatch the declared content
/// type may itself be the reason the error path fired, so the content falls
/// back to the raw bytes rather than suppressing the error handler.
fn decode_content(
    msg: &InboundMessage,
    target: &TargetType,
    error_dispatch: bool,
) -> Result<Value> {
    match codec::decode(msg.payload.clone(), target) {
        Ok(value) => Ok(value),
        Err(_) if error_dispatch => Ok(Value::Bytes(msg.payload.clone())),
        Err(e) => Err(Error::payload_binding(msg.subject.clone(), e)),
    }
}

fn check_constraints(
    msg: &InboundMessage,
    value: &Value,
    constraints: Option<&constraint::Constraints>,
) -> Result<()> {
    if let Some(constraints) = constraints {
        constraint::check(value, constraints)
            .map_err(|v| Error::payload_validation(msg.subject.clone(), v))?;
    }
    Ok(())
}
