use std::borrow::Cow;

use crate::any::TypeInfo;

#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error("Argument {index} is missing")]
    MissingArgument { index: usize },
    #[error("Argument {index} isn't of type {expected}")]
    IncorrectArgument { index: usize, expected: TypeInfo },
    #[error("Property `{key}` can't be injected into {class}")]
    UnknownProperty { class: TypeInfo, key: Cow<'static, str> },
    #[error("Instance isn't of type {expected}")]
    IncorrectInstance { expected: TypeInfo },
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}
