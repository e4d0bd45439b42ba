use std::{
    borrow::Cow,
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    sync::atomic::{self, AtomicU64},
};

use crate::any::TypeInfo;

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(0);

/// Unique token that isn't tied to a type or a name.
/// Two symbols with the same description are still different tokens.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    id: u64,
    description: &'static str,
}

impl Symbol {
    #[must_use]
    pub fn new(description: &'static str) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, atomic::Ordering::Relaxed),
            description,
        }
    }

    #[inline]
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Key of an injector table.
/// Classes are keyed by their type, everything else may use a name or a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    Type(TypeInfo),
    Name(Cow<'static, str>),
    Symbol(Symbol),
}

impl Token {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeInfo::of::<T>())
    }

    #[inline]
    #[must_use]
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(name.into())
    }

    #[inline]
    #[must_use]
    pub const fn type_info(&self) -> Option<TypeInfo> {
        match self {
            Self::Type(type_info) => Some(*type_info),
            Self::Name(_) | Self::Symbol(_) => None,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(type_info) => f.write_str(type_info.short_name()),
            Self::Name(name) => write!(f, "\"{name}\""),
            Self::Symbol(symbol) => write!(f, "Symbol({})", symbol.description),
        }
    }
}

impl From<&'static str> for Token {
    fn from(name: &'static str) -> Self {
        Self::Name(Cow::Borrowed(name))
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self::Name(Cow::Owned(name))
    }
}

impl From<Symbol> for Token {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<TypeInfo> for Token {
    fn from(type_info: TypeInfo) -> Self {
        Self::Type(type_info)
    }
}

impl From<&Token> for Token {
    fn from(token: &Token) -> Self {
        token.clone()
    }
}
