use std::any::TypeId;

use super::{AnnotationErrorKind, InjectorErrorKind, InstantiateErrorKind, Named, Requester};
use crate::{any::TypeInfo, token::Token};

/// Failure while building an instance.
/// `Deps` wraps failures of the sub-providers it depends on, `Factory` its own failure.
#[derive(thiserror::Error, Debug)]
pub enum InstantiatorErrorKind<DepsErr, FactoryErr> {
    #[error(transparent)]
    Deps(DepsErr),
    #[error(transparent)]
    Factory(FactoryErr),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    #[error(
        "No provider for {token}. Requested by {} in injector {}",
        Requester(.requested_by),
        Named(.injector)
    )]
    ProviderNotFound {
        token: Token,
        requested_by: Option<TypeInfo>,
        injector: Option<Token>,
    },
    /// `actual` is the concrete type of the stored value. It has no readable name, so it stays out of the message.
    #[error("Incorrect provider type for {token}. Expected: {expected}")]
    IncorrectType { token: Token, expected: TypeInfo, actual: TypeId },
    #[error(transparent)]
    Annotation(#[from] AnnotationErrorKind),
    #[error(transparent)]
    Injector(#[from] InjectorErrorKind),
    #[error(transparent)]
    Instantiator(InstantiatorErrorKind<Box<ResolveErrorKind>, InstantiateErrorKind>),
}

impl ResolveErrorKind {
    #[inline]
    #[must_use]
    pub(crate) fn deps(err: Self) -> Self {
        Self::Instantiator(InstantiatorErrorKind::Deps(Box::new(err)))
    }

    #[inline]
    #[must_use]
    pub(crate) fn factory(err: InstantiateErrorKind) -> Self {
        Self::Instantiator(InstantiatorErrorKind::Factory(err))
    }

    /// The innermost error, skipping `Deps` wrappers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Instantiator(InstantiatorErrorKind::Deps(err)) => err.root_cause(),
            _ => self,
        }
    }
}
