//! Signature validator for service declarations
//!
//! Scans one service impl block and checks every handler against the
//! allowed shapes: exactly one of on_message/on_request, an optional
//! on_error, the parameter table per role and the return class per role.
//! All findings for a declaration are collected; nothing stops at the
//! first error.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::{FnArg, ImplItem, ImplItemFn, ItemImpl, PatType, ReturnType, Type};

use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::semantic::{
    first_type_argument, is_envelope_shape, is_frozen, messaging_module, unwrap_type,
    AnnotationKind, SemanticModel,
};

/// The three recognized handler roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    OnMessage,
    OnRequest,
    OnError,
}

pub fn handler_kind(name: &str) -> Option<HandlerKind> {
    match name {
        "on_message" => Some(HandlerKind::OnMessage),
        "on_request" => Some(HandlerKind::OnRequest),
        "on_error" => Some(HandlerKind::OnError),
        _ => None,
    }
}

/// Classification of one handler parameter
#[derive(Debug, Clone)]
pub enum ParamKind {
    Envelope { frozen: bool, content: Type },
    Payload { frozen: bool, ty: Type },
}

/// Classify a parameter: an explicit payload marker forces the payload
/// role; otherwise any type whose record shape structurally matches the
/// envelope contract is the envelope, and everything else is payload.
pub fn classify_param(param: &PatType, model: &dyn SemanticModel) -> ParamKind {
    let frozen = is_frozen(&param.ty);
    let inner = unwrap_type(&param.ty).clone();

    let marked_payload = param.attrs.iter().any(|attr| {
        matches!(
            model.annotation(attr.path()),
            Some((module, AnnotationKind::Payload)) if module == *messaging_module()
        )
    });
    if marked_payload {
        return ParamKind::Payload { frozen, ty: inner };
    }

    if let Some(shape) = model.record_shape(&inner) {
        if is_envelope_shape(&shape) {
            let content = envelope_content_type(&inner);
            return ParamKind::Envelope { frozen, content };
        }
    }

    ParamKind::Payload { frozen, ty: inner }
}

/// Declared content type of an envelope parameter; structural envelopes
/// without a visible type argument decode as arbitrary JSON
pub fn envelope_content_type(ty: &Type) -> Type {
    if let Type::Path(type_path) = ty {
        if let Some(last) = type_path.path.segments.last() {
            if let Some(content) = first_type_argument(&last.arguments) {
                return content.clone();
            }
        }
    }
    syn::parse_quote!(::serde_json::Value)
}

/// Return shape of a handler
#[derive(Debug, Clone)]
pub enum RetShape {
    Unit,
    ResultUnit,
    Data(Type),
    ResultData(Type),
}

pub fn return_shape(output: &ReturnType) -> RetShape {
    let ty = match output {
        ReturnType::Default => return RetShape::Unit,
        ReturnType::Type(_, ty) => ty.as_ref(),
    };
    if is_unit(ty) {
        return RetShape::Unit;
    }
    if let Type::Path(type_path) = ty {
        if let Some(last) = type_path.path.segments.last() {
            if last.ident == "Result" {
                return match first_type_argument(&last.arguments) {
                    Some(ok) if !is_unit(ok) => RetShape::ResultData(ok.clone()),
                    _ => RetShape::ResultUnit,
                };
            }
        }
    }
    RetShape::Data(ty.clone())
}

fn is_unit(ty: &Type) -> bool {
    matches!(ty, Type::Tuple(tuple) if tuple.elems.is_empty())
}

/// Whether a type can be decoded into as an owned payload: references,
/// trait objects and the like cannot
fn is_owned_data_type(ty: &Type) -> bool {
    !matches!(
        ty,
        Type::Reference(_)
            | Type::ImplTrait(_)
            | Type::TraitObject(_)
            | Type::Ptr(_)
            | Type::Slice(_)
            | Type::BareFn(_)
    )
}

fn is_error_type(ty: &Type) -> bool {
    let mut inner = unwrap_type(ty);
    if let Type::Path(type_path) = inner {
        if let Some(last) = type_path.path.segments.last() {
            if last.ident == "Arc" {
                if let Some(arg) = first_type_argument(&last.arguments) {
                    inner = arg;
                }
            }
        }
    }
    match inner {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|last| last.ident.to_string().ends_with("Error")),
        _ => false,
    }
}

fn typed_params(method: &ImplItemFn) -> Vec<&PatType> {
    method
        .sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(param) => Some(param),
            FnArg::Receiver(_) => None,
        })
        .collect()
}

/// A service declaration as seen by the plugin: the impl block plus the
/// annotation paths attached to it (the invoking attribute included)
pub struct ServiceDeclaration<'a> {
    pub item: &'a ItemImpl,
    pub annotations: Vec<syn::Path>,
}

/// Validate one service declaration and return every finding
pub fn validate(decl: &ServiceDeclaration<'_>, model: &dyn SemanticModel) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut on_message_span: Option<Span> = None;
    let mut on_request_span: Option<Span> = None;

    for item in &decl.item.items {
        let ImplItem::Fn(method) = item else { continue };
        let name = method.sig.ident.to_string();
        let name_span = method.sig.ident.span();

        match handler_kind(&name) {
            Some(kind @ (HandlerKind::OnMessage | HandlerKind::OnRequest)) => {
                if kind == HandlerKind::OnMessage {
                    on_message_span = Some(name_span);
                } else {
                    on_request_span = Some(name_span);
                }
                check_consumer_handler(method, kind, model, &mut diags);
            }
            Some(HandlerKind::OnError) => {
                check_error_handler(method, model, &mut diags);
            }
            None => {
                if method.sig.asyncness.is_some() {
                    diags.push(Diagnostic::new(
                        DiagnosticCode::InvalidRemoteFunction,
                        name_span,
                    ));
                } else if name.starts_with("on_") {
                    diags.push(Diagnostic::new(DiagnosticCode::InvalidFunction, name_span));
                }
            }
        }
    }

    match (on_message_span, on_request_span) {
        (Some(_), Some(span)) => {
            diags.push(Diagnostic::new(DiagnosticCode::OnMessageOrOnRequest, span));
        }
        (None, None) => {
            diags.push(Diagnostic::new(
                DiagnosticCode::NoOnMessageOrOnRequest,
                decl.item.self_ty.span(),
            ));
        }
        _ => {}
    }

    check_annotations(decl, model, &mut diags);
    diags
}

fn check_consumer_handler(
    method: &ImplItemFn,
    kind: HandlerKind,
    model: &dyn SemanticModel,
    diags: &mut Vec<Diagnostic>,
) {
    if method.sig.asyncness.is_none() {
        diags.push(Diagnostic::new(
            DiagnosticCode::FunctionShouldBeRemote,
            method.sig.ident.span(),
        ));
    }

    let params = typed_params(method);
    match params.as_slice() {
        [] => diags.push(Diagnostic::new(
            DiagnosticCode::MustHaveMessageOrAnydata,
            method.sig.ident.span(),
        )),
        [only] => {
            // Envelope or payload are both fine alone, but the type must be
            // decodable into
            if !is_owned_data_type(unwrap_type(&only.ty)) {
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidFunctionParamMessageOrAnydata,
                    only.ty.span(),
                ));
            }
        }
        [first, second] => {
            let (first, second) = (*first, *second);
            // Fixed order: envelope, then payload; duplicate roles rejected
            if !matches!(classify_param(first, model), ParamKind::Envelope { .. }) {
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidFunctionParamMessage,
                    first.ty.span(),
                ));
            }
            match classify_param(second, model) {
                ParamKind::Envelope { .. } => diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidFunctionParamAnydata,
                    second.ty.span(),
                )),
                ParamKind::Payload { ref ty, .. } if !is_owned_data_type(ty) => {
                    diags.push(Diagnostic::new(
                        DiagnosticCode::InvalidFunctionParamAnydata,
                        second.ty.span(),
                    ));
                }
                ParamKind::Payload { .. } => {}
            }
        }
        _ => diags.push(Diagnostic::new(
            DiagnosticCode::OnlyParamsAllowed,
            method.sig.ident.span(),
        )),
    }

    let ret = return_shape(&method.sig.output);
    match kind {
        HandlerKind::OnMessage => {
            if !matches!(ret, RetShape::Unit | RetShape::ResultUnit) {
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidReturnTypeErrorOrNil,
                    method.sig.output.span(),
                ));
            }
        }
        HandlerKind::OnRequest => match ret {
            RetShape::Data(ty) | RetShape::ResultData(ty) if is_owned_data_type(&ty) => {}
            _ => diags.push(Diagnostic::new(
                DiagnosticCode::InvalidReturnTypeAnyData,
                method.sig.output.span(),
            )),
        },
        HandlerKind::OnError => unreachable!("handled by check_error_handler"),
    }
}

fn check_error_handler(
    method: &ImplItemFn,
    model: &dyn SemanticModel,
    diags: &mut Vec<Diagnostic>,
) {
    if method.sig.asyncness.is_none() {
        diags.push(Diagnostic::new(
            DiagnosticCode::FunctionShouldBeRemote,
            method.sig.ident.span(),
        ));
    }

    let params = typed_params(method);
    match params.as_slice() {
        [first, second] => {
            let (first, second) = (*first, *second);
            if !matches!(classify_param(first, model), ParamKind::Envelope { .. }) {
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidFunctionParamMessage,
                    first.ty.span(),
                ));
            }
            if !is_error_type(&second.ty) {
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidFunctionParamError,
                    second.ty.span(),
                ));
            }
        }
        params if params.len() < 2 => diags.push(Diagnostic::new(
            DiagnosticCode::MustHaveMessageAndError,
            method.sig.ident.span(),
        )),
        _ => diags.push(Diagnostic::new(
            DiagnosticCode::OnlyParamsAllowedOnError,
            method.sig.ident.span(),
        )),
    }

    if !matches!(
        return_shape(&method.sig.output),
        RetShape::Unit | RetShape::ResultUnit
    ) {
        diags.push(Diagnostic::new(
            DiagnosticCode::InvalidReturnTypeErrorOrNil,
            method.sig.output.span(),
        ));
    }
}

fn check_annotations(
    decl: &ServiceDeclaration<'_>,
    model: &dyn SemanticModel,
    diags: &mut Vec<Diagnostic>,
) {
    let mut service_annotations = 0usize;
    let mut listener_modules = HashSet::new();

    for path in &decl.annotations {
        match model.annotation(path) {
            Some((module, AnnotationKind::ServiceConfig)) => {
                if module == *messaging_module() {
                    service_annotations += 1;
                    listener_modules.insert(module);
                } else if model.is_messaging_module(&module) {
                    // A service annotation of some other messaging listener
                    listener_modules.insert(module);
                } else {
                    diags.push(Diagnostic::new(DiagnosticCode::InvalidAnnotation, path.span()));
                }
            }
            Some((_, AnnotationKind::Payload)) => {
                // The payload marker attaches to parameters, not services
                diags.push(Diagnostic::new(
                    DiagnosticCode::InvalidServiceAttachPoint,
                    path.span(),
                ));
            }
            None => {}
        }
    }

    if service_annotations == 0 {
        diags.push(Diagnostic::new(
            DiagnosticCode::NoAnnotation,
            decl.item.self_ty.span(),
        ));
    } else if service_annotations > 1 {
        diags.push(Diagnostic::new(
            DiagnosticCode::InvalidAnnotationNumber,
            decl.item.self_ty.span(),
        ));
    }

    if listener_modules.len() > 1 {
        diags.push(Diagnostic::new(
            DiagnosticCode::InvalidMultipleListeners,
            decl.item.self_ty.span(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{
        default_model, DefaultModel, FieldKind, ModuleIdentity, RecordField, RecordShape,
    };
    use syn::parse_quote;

    fn single_annotation() -> Vec<syn::Path> {
        vec![parse_quote!(courier::service)]
    }

    fn codes(diags: &[Diagnostic]) -> Vec<DiagnosticCode> {
        diags.iter().map(|d| d.code).collect()
    }

    fn validate_item(item: &ItemImpl) -> Vec<Diagnostic> {
        let decl = ServiceDeclaration {
            item,
            annotations: single_annotation(),
        };
        validate(&decl, default_model())
    }

    #[test]
    fn valid_service_produces_no_diagnostics() {
        let item: ItemImpl = parse_quote! {
            impl OrderService {
                async fn on_message(&self, msg: Envelope<Order>) -> courier::Result<()> {
                    Ok(())
                }
            }
        };
        assert!(validate_item(&item).is_empty());
    }

    #[test]
    fn non_remote_handler_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::FunctionShouldBeRemote]
        );
    }

    #[test]
    fn both_handlers_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn on_request(&self, msg: Envelope<Order>) -> String {
                    String::new()
                }
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::OnMessageOrOnRequest]
        );
    }

    #[test]
    fn neither_handler_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                fn helper(&self) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::NoOnMessageOrOnRequest]
        );
    }

    #[test]
    fn three_params_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>, data: String, extra: u32) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::OnlyParamsAllowed]
        );
    }

    #[test]
    fn one_param_on_error_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn on_error(&self, msg: Envelope<Order>) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::MustHaveMessageAndError]
        );
    }

    #[test]
    fn valid_on_error_passes() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn on_error(&self, msg: Envelope<Order>, cause: std::sync::Arc<courier::Error>) {}
            }
        };
        assert!(validate_item(&item).is_empty());
    }

    #[test]
    fn on_error_second_param_must_be_error() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn on_error(&self, msg: Envelope<Order>, cause: String) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidFunctionParamError]
        );
    }

    #[test]
    fn three_params_on_error_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn on_error(&self, msg: Envelope<Order>, cause: courier::Error, extra: u32) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::OnlyParamsAllowedOnError]
        );
    }

    #[test]
    fn zero_params_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::MustHaveMessageOrAnydata]
        );
    }

    #[test]
    fn reference_param_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: &str) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidFunctionParamMessageOrAnydata]
        );
    }

    #[test]
    fn two_params_require_envelope_first() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, data: String, msg: Envelope<Order>) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![
                DiagnosticCode::InvalidFunctionParamMessage,
                DiagnosticCode::InvalidFunctionParamAnydata,
            ]
        );
    }

    #[test]
    fn duplicate_envelope_role_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>, msg2: Envelope<Order>) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidFunctionParamAnydata]
        );
    }

    #[test]
    fn on_message_must_not_return_data() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) -> String {
                    String::new()
                }
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidReturnTypeErrorOrNil]
        );
    }

    #[test]
    fn on_request_must_return_data() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_request(&self, msg: Envelope<Order>) -> courier::Result<()> {
                    Ok(())
                }
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidReturnTypeAnyData]
        );
    }

    #[test]
    fn foreign_async_function_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                async fn refresh(&self) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidRemoteFunction]
        );
    }

    #[test]
    fn handler_lookalike_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
                fn on_status(&self) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidFunction]
        );
    }

    #[test]
    fn payload_marker_forces_payload_role() {
        // The parameter type looks like an envelope but the marker wins,
        // so the single-parameter handler binds it as payload.
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, #[payload] msg: Envelope<Order>) {}
            }
        };
        assert!(validate_item(&item).is_empty());

        // With two parameters, a payload-marked first parameter is no
        // longer a valid envelope slot.
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, #[payload] msg: Envelope<Order>, data: String) {}
            }
        };
        assert_eq!(
            codes(&validate_item(&item)),
            vec![DiagnosticCode::InvalidFunctionParamMessage]
        );
    }

    // Annotation rules

    #[test]
    fn missing_annotation_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: vec![],
        };
        assert_eq!(
            codes(&validate(&decl, default_model())),
            vec![DiagnosticCode::NoAnnotation]
        );
    }

    #[test]
    fn duplicate_annotation_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: vec![parse_quote!(courier::service), parse_quote!(service)],
        };
        assert_eq!(
            codes(&validate(&decl, default_model())),
            vec![DiagnosticCode::InvalidAnnotationNumber]
        );
    }

    #[test]
    fn foreign_lookalike_annotation_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: vec![parse_quote!(courier::service), parse_quote!(othermq::service)],
        };
        assert_eq!(
            codes(&validate(&decl, default_model())),
            vec![DiagnosticCode::InvalidAnnotation]
        );
    }

    #[test]
    fn payload_marker_on_service_is_flagged() {
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: vec![parse_quote!(courier::service), parse_quote!(courier::payload)],
        };
        assert_eq!(
            codes(&validate(&decl, default_model())),
            vec![DiagnosticCode::InvalidServiceAttachPoint]
        );
    }

    // Structural matching through a model with registered record shapes

    struct StubModel {
        envelopes: Vec<&'static str>,
        listener_modules: Vec<ModuleIdentity>,
    }

    impl SemanticModel for StubModel {
        fn annotation(&self, path: &syn::Path) -> Option<(ModuleIdentity, AnnotationKind)> {
            DefaultModel.annotation(path)
        }

        fn is_messaging_module(&self, module: &ModuleIdentity) -> bool {
            module == messaging_module() || self.listener_modules.contains(module)
        }

        fn record_shape(&self, ty: &Type) -> Option<RecordShape> {
            if let Type::Path(type_path) = unwrap_type(ty) {
                if let Some(last) = type_path.path.segments.last() {
                    if self.envelopes.contains(&last.ident.to_string().as_str()) {
                        return Some(RecordShape {
                            fields: vec![
                                RecordField::new("content", FieldKind::Data),
                                RecordField::new("subject", FieldKind::Text),
                                RecordField::new("reply_to", FieldKind::OptionalText),
                            ],
                        });
                    }
                }
            }
            DefaultModel.record_shape(ty)
        }
    }

    #[test]
    fn user_defined_envelope_record_is_accepted_structurally() {
        let model = StubModel {
            envelopes: vec!["OrderNote"],
            listener_modules: vec![],
        };
        // Two parameters: the custom record fills the envelope slot purely
        // by shape.
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: OrderNote, data: String) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: single_annotation(),
        };
        assert!(validate(&decl, &model).is_empty());
    }

    #[test]
    fn multiple_messaging_listeners_is_flagged() {
        let model = StubModel {
            envelopes: vec![],
            listener_modules: vec![ModuleIdentity::new("", "othermq")],
        };
        let item: ItemImpl = parse_quote! {
            impl Svc {
                async fn on_message(&self, msg: Envelope<Order>) {}
            }
        };
        let decl = ServiceDeclaration {
            item: &item,
            annotations: vec![parse_quote!(courier::service), parse_quote!(othermq::service)],
        };
        assert_eq!(
            codes(&validate(&decl, &model)),
            vec![DiagnosticCode::InvalidMultipleListeners]
        );
    }
}
