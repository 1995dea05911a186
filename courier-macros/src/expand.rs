//! Code generation for validated service declarations
//!
//! For `#[service]` on an impl block this emits the user's impl unchanged
//! (minus parameter markers), a `{Type}Service` wrapper holding the
//! instance behind an `Arc`, and a `MessagingService` implementation whose
//! `handlers()` builds the registration-time handler set with typed glue
//! closures.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, ExprLit, FnArg, Ident, ImplItem, ItemImpl, Lit, MetaNameValue, Token, Type};

use crate::semantic::{self, AnnotationKind, SemanticModel};
use crate::validate::{
    self, classify_param, handler_kind, return_shape, HandlerKind, ParamKind, RetShape,
    ServiceDeclaration,
};

/// Parsed `#[service(...)]` arguments
#[derive(Default)]
pub struct ServiceArgs {
    pub subject: Option<String>,
    pub queue: Option<String>,
    pub max_pending: Option<usize>,
    pub validation: Option<bool>,
}

impl Parse for ServiceArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = ServiceArgs::default();
        if input.is_empty() {
            return Ok(args);
        }
        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated(input)?;
        for pair in pairs {
            let key = pair
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();
            match key.as_str() {
                "subject" => args.subject = Some(string_value(&pair)?),
                "queue" => args.queue = Some(string_value(&pair)?),
                "max_pending" => args.max_pending = Some(int_value(&pair)?),
                "validation" => args.validation = Some(bool_value(&pair)?),
                _ => {
                    return Err(syn::Error::new_spanned(
                        &pair.path,
                        "unknown service option; expected subject, queue, max_pending or validation",
                    ))
                }
            }
        }
        Ok(args)
    }
}

fn string_value(pair: &MetaNameValue) -> syn::Result<String> {
    if let Expr::Lit(ExprLit {
        lit: Lit::Str(lit), ..
    }) = &pair.value
    {
        return Ok(lit.value());
    }
    Err(syn::Error::new(
        pair.value.span(),
        "expected a string literal",
    ))
}

fn int_value(pair: &MetaNameValue) -> syn::Result<usize> {
    if let Expr::Lit(ExprLit {
        lit: Lit::Int(lit), ..
    }) = &pair.value
    {
        return lit.base10_parse();
    }
    Err(syn::Error::new(
        pair.value.span(),
        "expected an integer literal",
    ))
}

fn bool_value(pair: &MetaNameValue) -> syn::Result<bool> {
    if let Expr::Lit(ExprLit {
        lit: Lit::Bool(lit), ..
    }) = &pair.value
    {
        return Ok(lit.value());
    }
    Err(syn::Error::new(
        pair.value.span(),
        "expected a boolean literal",
    ))
}

/// Attribute entry point: validate, then expand or report
pub fn service_entry(args: ServiceArgs, mut item: ItemImpl) -> TokenStream {
    let model = semantic::default_model();

    // Collect the listener annotations attached to this declaration: the
    // invoking attribute itself plus anything recognizable left on the impl
    // block. Recognized leftovers are stripped so they cannot expand twice.
    let mut annotations: Vec<syn::Path> = vec![syn::parse_quote!(courier::service)];
    let mut kept = Vec::new();
    for attr in item.attrs.drain(..) {
        if model.annotation(attr.path()).is_some() {
            annotations.push(attr.path().clone());
        } else {
            kept.push(attr);
        }
    }
    item.attrs = kept;

    let diagnostics = {
        let decl = ServiceDeclaration {
            item: &item,
            annotations,
        };
        validate::validate(&decl, model)
    };

    if !diagnostics.is_empty() {
        strip_payload_markers(&mut item, model);
        let errors = diagnostics.iter().map(|d| d.to_compile_error());
        return quote! {
            #item
            #(#errors)*
        };
    }

    let service_type = match type_ident(&item.self_ty) {
        Some(ident) => ident,
        None => {
            return syn::Error::new(item.self_ty.span(), "service must be a named struct")
                .to_compile_error()
        }
    };

    let plan = build_plan(&item, model);
    strip_payload_markers(&mut item, model);

    let self_ty = &item.self_ty;
    let service_name = service_type.to_string();
    let wrapper = format_ident!("{}Service", service_type);
    let config_fn = config_fn(&args);
    let handler_blocks: Vec<TokenStream> = plan
        .iter()
        .map(|handler| handler_block(handler, &service_name))
        .collect();

    quote! {
        #item

        /// Auto-generated service wrapper
        pub struct #wrapper {
            inner: ::std::sync::Arc<#self_ty>,
        }

        impl #wrapper {
            pub fn new(inner: #self_ty) -> Self {
                Self {
                    inner: ::std::sync::Arc::new(inner),
                }
            }
        }

        impl ::courier::MessagingService for #wrapper {
            fn name(&self) -> &'static str {
                #service_name
            }

            #config_fn

            fn handlers(&self) -> ::courier::HandlerSet {
                let mut builder = ::courier::HandlerSet::builder();
                #(#handler_blocks)*
                builder.build()
            }
        }
    }
}

fn type_ident(ty: &Type) -> Option<Ident> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last().map(|s| s.ident.clone()),
        _ => None,
    }
}

/// Plan for one handler's glue
struct HandlerPlan {
    kind: HandlerKind,
    method: Ident,
    params: Vec<ParamPlan>,
    ret: RetShape,
}

enum ParamPlan {
    Envelope { frozen: bool, content: Type },
    Payload { frozen: bool, ty: Type },
    ErrorCause,
}

fn build_plan(item: &ItemImpl, model: &dyn SemanticModel) -> Vec<HandlerPlan> {
    let mut plans = Vec::new();
    for impl_item in &item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let Some(kind) = handler_kind(&method.sig.ident.to_string()) else {
            continue;
        };

        let typed: Vec<_> = method
            .sig
            .inputs
            .iter()
            .filter_map(|arg| match arg {
                FnArg::Typed(param) => Some(param),
                FnArg::Receiver(_) => None,
            })
            .collect();

        let params = typed
            .iter()
            .copied()
            .enumerate()
            .map(|(idx, param)| {
                // For on_error the second position is always the cause.
                if kind == HandlerKind::OnError && idx == 1 {
                    return ParamPlan::ErrorCause;
                }
                match classify_param(param, model) {
                    ParamKind::Envelope { frozen, content } => {
                        ParamPlan::Envelope { frozen, content }
                    }
                    ParamKind::Payload { frozen, ty } => ParamPlan::Payload { frozen, ty },
                }
            })
            .collect();

        plans.push(HandlerPlan {
            kind,
            method: method.sig.ident.clone(),
            params,
            ret: return_shape(&method.sig.output),
        });
    }
    plans
}

fn config_fn(args: &ServiceArgs) -> TokenStream {
    let mut sets = Vec::new();
    if let Some(subject) = &args.subject {
        sets.push(quote! { config.subject = Some(#subject.to_string()); });
    }
    if let Some(queue) = &args.queue {
        sets.push(quote! { config.queue_group = Some(#queue.to_string()); });
    }
    if let Some(max_pending) = args.max_pending {
        sets.push(quote! { config.max_pending = #max_pending; });
    }
    if let Some(validation) = args.validation {
        sets.push(quote! { config.validation = #validation; });
    }

    if sets.is_empty() {
        quote! {
            fn config(&self) -> ::courier::ConsumerConfig {
                ::courier::ConsumerConfig::default()
            }
        }
    } else {
        quote! {
            fn config(&self) -> ::courier::ConsumerConfig {
                let mut config = ::courier::ConsumerConfig::default();
                #(#sets)*
                config
            }
        }
    }
}

fn handler_block(handler: &HandlerPlan, service_name: &str) -> TokenStream {
    let specs: Vec<TokenStream> = handler.params.iter().map(param_spec).collect();
    let ret_class = match handler.ret {
        RetShape::Unit => quote!(::courier::handler::ReturnClass::None),
        RetShape::ResultUnit => quote!(::courier::handler::ReturnClass::ErrorOrNone),
        RetShape::Data(_) | RetShape::ResultData(_) => {
            quote!(::courier::handler::ReturnClass::AnydataOrError)
        }
    };

    // Extraction runs in reverse declaration order so removal keeps the
    // remaining indices stable.
    let mut extract: Vec<TokenStream> = Vec::new();
    let arg_names: Vec<Ident> = (0..handler.params.len())
        .map(|idx| format_ident!("__arg{}", idx))
        .collect();
    for (idx, param) in handler.params.iter().enumerate().rev() {
        let name = &arg_names[idx];
        extract.push(match param {
            ParamPlan::Envelope { frozen: false, content } => quote! {
                let #name = ::courier::handler::take_envelope::<#content>(&mut args, #idx)?;
            },
            ParamPlan::Envelope { frozen: true, content } => quote! {
                let #name = ::courier::handler::take_frozen_envelope::<#content>(&mut args, #idx)?;
            },
            ParamPlan::Payload { frozen: false, ty } => quote! {
                let #name = ::courier::handler::take_payload::<#ty>(&mut args, #idx)?;
            },
            ParamPlan::Payload { frozen: true, ty } => quote! {
                let #name = ::courier::handler::take_frozen_payload::<#ty>(&mut args, #idx)?;
            },
            ParamPlan::ErrorCause => quote! {
                let #name = ::courier::handler::take_error_cause(&mut args, #idx)?;
            },
        });
    }

    let method = &handler.method;
    let call = quote!(inner.#method(#(#arg_names),*));
    let invoke = match (&handler.kind, &handler.ret) {
        (HandlerKind::OnRequest, RetShape::Data(ty)) => {
            let conv = reply_conversion(ty);
            quote! {
                let ret = #call.await;
                #conv
            }
        }
        (HandlerKind::OnRequest, RetShape::ResultData(ty)) => {
            let conv = reply_conversion(ty);
            quote! {
                let ret = #call
                    .await
                    .map_err(|e| ::courier::Error::handler(#service_name, e))?;
                #conv
            }
        }
        (_, RetShape::ResultUnit) => quote! {
            #call
                .await
                .map_err(|e| ::courier::Error::handler(#service_name, e))?;
            Ok(())
        },
        _ => quote! {
            #call.await;
            Ok(())
        },
    };

    let builder_method = match handler.kind {
        HandlerKind::OnMessage => format_ident!("on_message"),
        HandlerKind::OnRequest => format_ident!("on_request"),
        HandlerKind::OnError => format_ident!("on_error"),
    };

    quote! {
        {
            let inner = ::std::sync::Arc::clone(&self.inner);
            builder = builder.#builder_method(
                ::courier::handler::HandlerSignature::new(
                    vec![#(#specs),*],
                    #ret_class,
                ),
                move |mut args: ::std::vec::Vec<::courier::handler::BoundArg>| {
                    let inner = ::std::sync::Arc::clone(&inner);
                    async move {
                        #(#extract)*
                        #invoke
                    }
                },
            );
        }
    }
}

fn param_spec(param: &ParamPlan) -> TokenStream {
    match param {
        ParamPlan::Envelope { frozen, content } => {
            let target = target_tokens(content);
            let base = quote!(::courier::handler::ParamSpec::envelope(#target));
            if *frozen {
                quote!(#base.readonly())
            } else {
                base
            }
        }
        ParamPlan::Payload { frozen, ty } => {
            let target = target_tokens(ty);
            let base = quote!(::courier::handler::ParamSpec::payload(#target));
            if *frozen {
                quote!(#base.readonly())
            } else {
                base
            }
        }
        ParamPlan::ErrorCause => quote!(::courier::handler::ParamSpec::error_cause()),
    }
}

/// Syntactic payload kind, mapping declared types onto decode targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadShape {
    Text,
    Int,
    Float,
    Bool,
    Bytes,
    Other,
}

fn payload_shape(ty: &Type) -> PayloadShape {
    let Type::Path(type_path) = ty else {
        return PayloadShape::Other;
    };
    let Some(last) = type_path.path.segments.last() else {
        return PayloadShape::Other;
    };
    let ident = last.ident.to_string();
    match ident.as_str() {
        "String" | "str" => PayloadShape::Text,
        "bool" => PayloadShape::Bool,
        "f32" | "f64" => PayloadShape::Float,
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "isize" | "usize" => {
            PayloadShape::Int
        }
        "Vec" => match semantic::first_type_argument(&last.arguments) {
            Some(Type::Path(elem)) if elem.path.is_ident("u8") => PayloadShape::Bytes,
            _ => PayloadShape::Other,
        },
        _ => PayloadShape::Other,
    }
}

fn target_tokens(ty: &Type) -> TokenStream {
    match payload_shape(ty) {
        PayloadShape::Text => quote!(::courier::codec::TargetType::String),
        PayloadShape::Int => quote!(::courier::codec::TargetType::Int),
        PayloadShape::Float => quote!(::courier::codec::TargetType::Float),
        PayloadShape::Bool => quote!(::courier::codec::TargetType::Bool),
        PayloadShape::Bytes => quote!(::courier::codec::TargetType::Bytes),
        PayloadShape::Other => quote!(::courier::codec::TargetType::Any),
    }
}

/// Whether a scalar reply type goes through `IntoValue` (raw encoding)
/// rather than the serde JSON path
fn has_into_value(ty: &Type) -> bool {
    let Type::Path(type_path) = ty else {
        return false;
    };
    let Some(last) = type_path.path.segments.last() else {
        return false;
    };
    matches!(
        last.ident.to_string().as_str(),
        "String"
            | "bool"
            | "f32"
            | "f64"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "u8"
            | "u16"
            | "u32"
            | "Value"
    ) || payload_shape(ty) == PayloadShape::Bytes
}

fn reply_conversion(ty: &Type) -> TokenStream {
    if has_into_value(ty) {
        quote! {
            Ok(::courier::codec::IntoValue::into_value(ret))
        }
    } else {
        quote! {
            match ::courier::codec::to_value(&ret) {
                Ok(value) => Ok(value),
                Err(e) => Err(::courier::Error::contract(
                    format!("reply encoding failed: {e}"),
                )),
            }
        }
    }
}

fn strip_payload_markers(item: &mut ItemImpl, model: &dyn SemanticModel) {
    for impl_item in &mut item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        for arg in &mut method.sig.inputs {
            if let FnArg::Typed(param) = arg {
                param.attrs.retain(|attr| {
                    !matches!(
                        model.annotation(attr.path()),
                        Some((module, AnnotationKind::Payload))
                            if module == *crate::semantic::messaging_module()
                    )
                });
            }
        }
    }
}
