//! Semantic model seam for the service validator
//!
//! A procedural macro only sees the tokens of the item it decorates, so
//! anything that needs symbol or type knowledge goes through the
//! [`SemanticModel`] trait. The macro entry point uses the syntactic
//! [`DefaultModel`] resolved once against the crate's module identity;
//! tests drive the structural rules through stub models with registered
//! record shapes.

use std::sync::OnceLock;

use syn::{GenericArgument, PathArguments, Type};

/// Identity of the module an annotation or type belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub org: String,
    pub name: String,
}

impl ModuleIdentity {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
        }
    }
}

/// The messaging module this plugin validates for
pub fn messaging_module() -> &'static ModuleIdentity {
    static IDENTITY: OnceLock<ModuleIdentity> = OnceLock::new();
    IDENTITY.get_or_init(|| ModuleIdentity::new("loyalpartner", "courier"))
}

/// Kinds of annotations the messaging module defines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    /// The service-level configuration attribute
    ServiceConfig,
    /// The parameter-level payload marker
    Payload,
}

/// Field classification for structural record matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// string
    Text,
    /// optional string
    OptionalText,
    /// arbitrary payload data
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub kind: FieldKind,
}

impl RecordField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Structural shape of a record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordShape {
    pub fields: Vec<RecordField>,
}

/// Whether a record shape is envelope-compatible: exactly the three fields
/// content / subject / reply_to with string-typed routing fields. The match
/// is structural, not nominal - any record with this shape qualifies.
pub fn is_envelope_shape(shape: &RecordShape) -> bool {
    if shape.fields.len() != 3 {
        return false;
    }
    let field = |name: &str| shape.fields.iter().find(|f| f.name == name);
    let content_ok = field("content").is_some();
    let subject_ok = field("subject").is_some_and(|f| f.kind == FieldKind::Text);
    let reply_ok = field("reply_to")
        .is_some_and(|f| matches!(f.kind, FieldKind::Text | FieldKind::OptionalText));
    content_ok && subject_ok && reply_ok
}

/// Symbol and type queries the validator needs
pub trait SemanticModel {
    /// Resolve an attribute path to the module and annotation kind it
    /// belongs to, if it is a known annotation at all
    fn annotation(&self, path: &syn::Path) -> Option<(ModuleIdentity, AnnotationKind)>;

    /// Whether a module is a messaging listener module
    fn is_messaging_module(&self, module: &ModuleIdentity) -> bool;

    /// Structural shape of a type, when known
    fn record_shape(&self, ty: &Type) -> Option<RecordShape>;
}

/// Syntactic model used by the macro entry point.
///
/// It knows the canonical `Envelope<T>` record and this module's own
/// annotations; everything else is unresolved.
pub struct DefaultModel;

/// Shared model instance, resolved once
pub fn default_model() -> &'static DefaultModel {
    static MODEL: OnceLock<DefaultModel> = OnceLock::new();
    MODEL.get_or_init(|| DefaultModel)
}

impl DefaultModel {
    fn annotation_module(path: &syn::Path) -> ModuleIdentity {
        // Bare `service` / `payload` or a path rooted in this crate resolve
        // to the messaging module; any other root is a foreign module.
        let segments: Vec<String> = path
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        match segments.as_slice() {
            [_single] => messaging_module().clone(),
            [root, ..] if root == "courier" || root == "courier_macros" => {
                messaging_module().clone()
            }
            [root, ..] => ModuleIdentity::new("", root.clone()),
            [] => ModuleIdentity::new("", ""),
        }
    }
}

impl SemanticModel for DefaultModel {
    fn annotation(&self, path: &syn::Path) -> Option<(ModuleIdentity, AnnotationKind)> {
        let last = path.segments.last()?.ident.to_string();
        let kind = match last.as_str() {
            "service" | "consumer" => AnnotationKind::ServiceConfig,
            "payload" => AnnotationKind::Payload,
            _ => return None,
        };
        Some((Self::annotation_module(path), kind))
    }

    fn is_messaging_module(&self, module: &ModuleIdentity) -> bool {
        module == messaging_module()
    }

    fn record_shape(&self, ty: &Type) -> Option<RecordShape> {
        let path = match unwrap_type(ty) {
            Type::Path(type_path) => &type_path.path,
            _ => return None,
        };
        let last = path.segments.last()?;
        if last.ident != "Envelope" {
            return None;
        }
        Some(RecordShape {
            fields: vec![
                RecordField::new("content", FieldKind::Data),
                RecordField::new("subject", FieldKind::Text),
                RecordField::new("reply_to", FieldKind::OptionalText),
            ],
        })
    }
}

/// Strip grouping and `Frozen<..>` wrappers off a parameter type
pub fn unwrap_type(ty: &Type) -> &Type {
    match ty {
        Type::Paren(inner) => unwrap_type(&inner.elem),
        Type::Group(inner) => unwrap_type(&inner.elem),
        Type::Path(type_path) => {
            if let Some(last) = type_path.path.segments.last() {
                if last.ident == "Frozen" {
                    if let Some(inner) = first_type_argument(&last.arguments) {
                        return unwrap_type(inner);
                    }
                }
            }
            ty
        }
        _ => ty,
    }
}

/// Whether the declared parameter type is read-only (`Frozen<..>`)
pub fn is_frozen(ty: &Type) -> bool {
    match ty {
        Type::Paren(inner) => is_frozen(&inner.elem),
        Type::Group(inner) => is_frozen(&inner.elem),
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|last| last.ident == "Frozen"),
        _ => false,
    }
}

/// First generic type argument of a path segment
pub fn first_type_argument(arguments: &PathArguments) -> Option<&Type> {
    match arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn canonical_envelope_is_structurally_matched() {
        let model = DefaultModel;
        let ty: Type = parse_quote!(Envelope<Order>);
        let shape = model.record_shape(&ty).unwrap();
        assert!(is_envelope_shape(&shape));

        let ty: Type = parse_quote!(courier::Envelope<String>);
        assert!(model.record_shape(&ty).is_some());

        let ty: Type = parse_quote!(Order);
        assert!(model.record_shape(&ty).is_none());
    }

    #[test]
    fn frozen_wrappers_unwrap() {
        let ty: Type = parse_quote!(Frozen<Envelope<Order>>);
        assert!(is_frozen(&ty));
        let inner = unwrap_type(&ty);
        assert_eq!(inner, &parse_quote!(Envelope<Order>));
    }

    #[test]
    fn envelope_shape_rules() {
        let good = RecordShape {
            fields: vec![
                RecordField::new("content", FieldKind::Data),
                RecordField::new("subject", FieldKind::Text),
                RecordField::new("reply_to", FieldKind::OptionalText),
            ],
        };
        assert!(is_envelope_shape(&good));

        // A user-defined record with the same three fields also qualifies
        let custom = RecordShape {
            fields: vec![
                RecordField::new("subject", FieldKind::Text),
                RecordField::new("reply_to", FieldKind::Text),
                RecordField::new("content", FieldKind::Data),
            ],
        };
        assert!(is_envelope_shape(&custom));

        let wrong_count = RecordShape {
            fields: vec![
                RecordField::new("content", FieldKind::Data),
                RecordField::new("subject", FieldKind::Text),
            ],
        };
        assert!(!is_envelope_shape(&wrong_count));

        let wrong_kind = RecordShape {
            fields: vec![
                RecordField::new("content", FieldKind::Data),
                RecordField::new("subject", FieldKind::Data),
                RecordField::new("reply_to", FieldKind::Text),
            ],
        };
        assert!(!is_envelope_shape(&wrong_kind));
    }

    #[test]
    fn annotation_resolution() {
        let model = DefaultModel;

        let (module, kind) = model.annotation(&parse_quote!(service)).unwrap();
        assert_eq!(&module, messaging_module());
        assert_eq!(kind, AnnotationKind::ServiceConfig);

        let (module, kind) = model.annotation(&parse_quote!(courier::payload)).unwrap();
        assert_eq!(&module, messaging_module());
        assert_eq!(kind, AnnotationKind::Payload);

        // Lookalike from another crate is recognized by name but resolves
        // to a foreign module
        let (module, _) = model.annotation(&parse_quote!(othermq::service)).unwrap();
        assert_ne!(&module, messaging_module());
        assert!(!model.is_messaging_module(&module));

        assert!(model.annotation(&parse_quote!(derive)).is_none());
    }
}
