//! Procedural macros for courier - messaging services
//!
//! The `#[service]` attribute validates a service impl block against the
//! allowed handler shapes and, when valid, generates the service wrapper
//! used for attaching the service to a listener. Validation failures are
//! reported as compile errors carrying stable diagnostic codes.

use proc_macro::TokenStream;
use syn::parse_macro_input;

mod diagnostics;
mod expand;
mod semantic;
mod validate;

/// Attribute macro for messaging service declarations.
///
/// ```rust,ignore
/// #[service(subject = "orders.created", queue = "workers")]
/// impl OrderProcessor {
///     async fn on_message(&self, msg: Envelope<Order>) -> courier::Result<()> {
///         Ok(())
///     }
/// }
/// ```
///
/// Options: `subject`, `queue`, `max_pending`, `validation`.
#[proc_macro_attribute]
pub fn service(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as expand::ServiceArgs);
    let item = parse_macro_input!(input as syn::ItemImpl);
    expand::service_entry(args, item).into()
}

/// Marker attribute for handler parameters that must bind as payload even
/// when their type is envelope-shaped.
///
/// Processed (and stripped) by `#[service]`; standalone use is a no-op.
#[proc_macro_attribute]
pub fn payload(_args: TokenStream, input: TokenStream) -> TokenStream {
    input
}
