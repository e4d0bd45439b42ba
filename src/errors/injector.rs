use super::Named;
use crate::token::Token;

#[derive(thiserror::Error, Debug, Clone)]
pub enum InjectorErrorKind {
    #[error("Injector {} already has another parent", Named(.injector))]
    ParentAlreadySet { injector: Option<Token> },
    #[error("Injector {} can't become a descendant of itself", Named(.injector))]
    CyclicParent { injector: Option<Token> },
    #[error("Injector is already named {current}, it can't be renamed to {requested}")]
    NameAlreadySet { current: Token, requested: Token },
    #[error("Provider {token} is already registered and isn't mutable")]
    ImmutableProvider { token: Token },
}
