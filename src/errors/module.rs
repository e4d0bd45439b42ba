use super::{AnnotationErrorKind, InjectorErrorKind, Path, ResolveErrorKind};
use crate::token::Token;

#[derive(thiserror::Error, Debug)]
pub enum ModuleErrorKind {
    #[error("Module {module} is already initialized")]
    AlreadyInitialized { module: Token },
    #[error("{module} isn't declared as a module")]
    NotAModule { module: Token },
    #[error("Module {module} isn't composed in this graph")]
    NotFound { module: Token },
    #[error("Cyclic import detected: {}", Path(.chain))]
    CyclicImport { chain: Vec<Token> },
    #[error(transparent)]
    Annotation(#[from] AnnotationErrorKind),
    #[error(transparent)]
    Injector(#[from] InjectorErrorKind),
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
}
