//! Compile-time diagnostics emitted by the service validator
//!
//! Every rule failure carries a stable code so build tooling and tests can
//! match on it. Diagnostics never abort validation early; the full list for
//! a declaration is collected and reported together.

use proc_macro2::Span;

/// Diagnostic severity. Errors fail the build through the compiler's own
/// aggregation; warnings are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    #[allow(dead_code)]
    Warning,
}

/// Stable identifiers for every validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    NoOnMessageOrOnRequest,
    OnMessageOrOnRequest,
    FunctionShouldBeRemote,
    InvalidRemoteFunction,
    InvalidFunction,
    MustHaveMessageOrAnydata,
    InvalidFunctionParamMessage,
    InvalidFunctionParamMessageOrAnydata,
    InvalidFunctionParamAnydata,
    OnlyParamsAllowed,
    MustHaveMessageAndError,
    InvalidFunctionParamError,
    OnlyParamsAllowedOnError,
    InvalidReturnTypeErrorOrNil,
    InvalidReturnTypeAnyData,
    NoAnnotation,
    InvalidAnnotationNumber,
    InvalidAnnotation,
    InvalidServiceAttachPoint,
    InvalidMultipleListeners,
}

impl DiagnosticCode {
    /// Stable code string, stamped into every rendered message
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticCode::NoOnMessageOrOnRequest => "COURIER_101",
            DiagnosticCode::OnMessageOrOnRequest => "COURIER_102",
            DiagnosticCode::FunctionShouldBeRemote => "COURIER_103",
            DiagnosticCode::InvalidRemoteFunction => "COURIER_104",
            DiagnosticCode::InvalidFunction => "COURIER_105",
            DiagnosticCode::MustHaveMessageOrAnydata => "COURIER_106",
            DiagnosticCode::InvalidFunctionParamMessage => "COURIER_107",
            DiagnosticCode::InvalidFunctionParamMessageOrAnydata => "COURIER_108",
            DiagnosticCode::InvalidFunctionParamAnydata => "COURIER_109",
            DiagnosticCode::OnlyParamsAllowed => "COURIER_110",
            DiagnosticCode::MustHaveMessageAndError => "COURIER_111",
            DiagnosticCode::InvalidFunctionParamError => "COURIER_112",
            DiagnosticCode::OnlyParamsAllowedOnError => "COURIER_113",
            DiagnosticCode::InvalidReturnTypeErrorOrNil => "COURIER_114",
            DiagnosticCode::InvalidReturnTypeAnyData => "COURIER_115",
            DiagnosticCode::NoAnnotation => "COURIER_116",
            DiagnosticCode::InvalidAnnotationNumber => "COURIER_117",
            DiagnosticCode::InvalidAnnotation => "COURIER_118",
            DiagnosticCode::InvalidServiceAttachPoint => "COURIER_119",
            DiagnosticCode::InvalidMultipleListeners => "COURIER_120",
        }
    }

    /// Message template for the rule
    pub fn message(&self) -> &'static str {
        match self {
            DiagnosticCode::NoOnMessageOrOnRequest => {
                "service must declare an on_message or on_request handler"
            }
            DiagnosticCode::OnMessageOrOnRequest => {
                "service cannot declare both on_message and on_request; a consumer either free-runs or replies"
            }
            DiagnosticCode::FunctionShouldBeRemote => "handler functions must be declared async",
            DiagnosticCode::InvalidRemoteFunction => {
                "only on_message, on_request and on_error may be async handler functions"
            }
            DiagnosticCode::InvalidFunction => {
                "unrecognized handler-like function; expected on_message, on_request or on_error"
            }
            DiagnosticCode::MustHaveMessageOrAnydata => {
                "handler must take an envelope or payload parameter"
            }
            DiagnosticCode::InvalidFunctionParamMessage => {
                "first of two handler parameters must be the envelope"
            }
            DiagnosticCode::InvalidFunctionParamMessageOrAnydata => {
                "handler parameter must be an envelope or an owned payload type"
            }
            DiagnosticCode::InvalidFunctionParamAnydata => {
                "second handler parameter must be an owned payload type"
            }
            DiagnosticCode::OnlyParamsAllowed => {
                "handler takes at most two parameters: envelope and payload"
            }
            DiagnosticCode::MustHaveMessageAndError => {
                "on_error must take the envelope and the causing error"
            }
            DiagnosticCode::InvalidFunctionParamError => {
                "second on_error parameter must be an error type"
            }
            DiagnosticCode::OnlyParamsAllowedOnError => {
                "on_error takes exactly two parameters: envelope and error"
            }
            DiagnosticCode::InvalidReturnTypeErrorOrNil => {
                "handler must return nothing or Result<()>"
            }
            DiagnosticCode::InvalidReturnTypeAnyData => {
                "on_request must return reply data or Result of reply data"
            }
            DiagnosticCode::NoAnnotation => {
                "service declaration carries no messaging service annotation"
            }
            DiagnosticCode::InvalidAnnotationNumber => {
                "service declaration carries more than one service annotation"
            }
            DiagnosticCode::InvalidAnnotation => {
                "annotation does not belong to the messaging module"
            }
            DiagnosticCode::InvalidServiceAttachPoint => {
                "annotation is not valid at the service level"
            }
            DiagnosticCode::InvalidMultipleListeners => {
                "service is attached to more than one messaging listener"
            }
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

/// One reported finding, anchored to the offending syntax
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, span: Span) -> Self {
        Self {
            code,
            severity: code.severity(),
            span,
            message: format!("[{}] {}", code.code(), code.message()),
        }
    }

    /// Lower into a compiler error token stream
    pub fn to_compile_error(&self) -> proc_macro2::TokenStream {
        syn::Error::new(self.span, &self.message).to_compile_error()
    }
}
