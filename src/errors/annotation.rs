use std::borrow::Cow;

use crate::{annotation::Discriminant, any::TypeInfo};

#[derive(thiserror::Error, Debug, Clone)]
pub enum AnnotationErrorKind {
    #[error("Annotation @{name} was never declared in this registry")]
    InvalidAnnotation { name: &'static str },
    #[error("Annotation @{name} can't be read as {requested} metadata. Use `{getter}` instead")]
    KindMismatch {
        name: &'static str,
        requested: Discriminant,
        getter: &'static str,
    },
    #[error("Annotation @{name} can't be applied to a {discriminant} of {class}")]
    NotApplicable {
        name: &'static str,
        discriminant: Discriminant,
        class: TypeInfo,
    },
    #[error("Token of constructor parameter {index} of {class} is unknown. Declare the constructor or inject it explicitly")]
    UnresolvableParameter { class: TypeInfo, index: usize },
    #[error("Token of property `{key}` of {class} is unknown. Declare its type or inject it explicitly")]
    UnresolvableProperty { class: TypeInfo, key: Cow<'static, str> },
    #[error("Inheritance chain of {class} is cyclic")]
    CyclicInheritance { class: TypeInfo },
}
