mod annotation;
mod injector;
mod instantiate;
mod invoke;
mod module;
mod resolve;

pub use annotation::AnnotationErrorKind;
pub use injector::InjectorErrorKind;
pub use instantiate::InstantiateErrorKind;
pub use invoke::InvokeErrorKind;
pub use module::ModuleErrorKind;
pub use resolve::{InstantiatorErrorKind, ResolveErrorKind};

use std::fmt::{self, Display, Formatter};

use crate::{any::TypeInfo, token::Token};

/// Display helper for optional injector names
pub(crate) struct Named<'a>(pub(crate) &'a Option<Token>);

impl Display for Named<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => Display::fmt(name, f),
            None => f.write_str("<unnamed>"),
        }
    }
}

/// Display helper for the class that requested a token
pub(crate) struct Requester<'a>(pub(crate) &'a Option<TypeInfo>);

impl Display for Requester<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(type_info) => Display::fmt(type_info, f),
            None => f.write_str("<unknown>"),
        }
    }
}

/// Display helper for token chains, written as `A -> B -> A`
pub(crate) struct Path<'a>(pub(crate) &'a [Token]);

impl Display for Path<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, token) in self.0.iter().enumerate() {
            if index != 0 {
                f.write_str(" -> ")?;
            }
            Display::fmt(token, f)?;
        }
        Ok(())
    }
}
