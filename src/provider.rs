use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    future::Future,
    sync::Arc,
};

use crate::{
    any::Value,
    class::{Arguments, Class, Injectable},
    errors::InstantiateErrorKind,
    outcome::Outcome,
    token::Token,
};

/// Factory called with the instances of its sub-providers, in order
pub type Factory = Arc<dyn Fn(Arguments) -> Outcome<Value, InstantiateErrorKind> + Send + Sync>;

#[derive(Clone)]
pub enum ProviderKind {
    /// Ready instance, registered as is
    Value(Value),
    /// Class constructed through its declared metadata
    Class(Class),
    Factory(Factory),
}

/// Normalized provider: what to register, how to build it
/// and the providers resolved in a scratch injector right before building it
#[derive(Clone)]
pub struct ProviderRecord {
    pub provide: Token,
    pub kind: ProviderKind,
    pub providers: Vec<ProviderRecord>,
}

impl ProviderRecord {
    #[inline]
    #[must_use]
    pub fn value<T: Any + Send + Sync>(provide: impl Into<Token>, value: T) -> Self {
        Self::shared(provide, Arc::new(value))
    }

    /// Registers an instance that is already shared
    #[inline]
    #[must_use]
    pub fn shared(provide: impl Into<Token>, value: Value) -> Self {
        Self {
            provide: provide.into(),
            kind: ProviderKind::Value(value),
            providers: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn class<T: Injectable>() -> Self {
        Class::of::<T>().into()
    }

    /// Builds `T` but registers it under `provide`
    #[inline]
    #[must_use]
    pub fn use_class<T: Injectable>(provide: impl Into<Token>) -> Self {
        Self {
            provide: provide.into(),
            kind: ProviderKind::Class(Class::of::<T>()),
            providers: Vec::new(),
        }
    }

    /// Synchronous factory.
    /// It receives the instances of `providers`, resolved in the same order.
    #[must_use]
    pub fn factory<T, F>(provide: impl Into<Token>, providers: impl IntoIterator<Item = ProviderRecord>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arguments) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        Self {
            provide: provide.into(),
            kind: ProviderKind::Factory(Arc::new(move |args| {
                Outcome::ready(factory(args).map(|value| Arc::new(value) as Value))
            })),
            providers: providers.into_iter().collect(),
        }
    }

    /// Asynchronous factory, awaited by async resolution and driven to completion by blocking resolution
    #[must_use]
    pub fn async_factory<T, F, Fut>(provide: impl Into<Token>, providers: impl IntoIterator<Item = ProviderRecord>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InstantiateErrorKind>> + Send + 'static,
    {
        Self {
            provide: provide.into(),
            kind: ProviderKind::Factory(Arc::new(move |args| {
                let future = factory(args);
                Outcome::pending(async move { future.await.map(|value| Arc::new(value) as Value) })
            })),
            providers: providers.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn with_providers<P>(mut self, providers: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<ProviderRecord>,
    {
        self.providers.extend(providers.into_iter().map(Into::into));
        self
    }

    #[inline]
    #[must_use]
    pub const fn token(&self) -> &Token {
        &self.provide
    }

    /// Class built by this provider, if any
    #[inline]
    #[must_use]
    pub const fn class_ref(&self) -> Option<&Class> {
        match &self.kind {
            ProviderKind::Class(class) => Some(class),
            ProviderKind::Value(_) | ProviderKind::Factory(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self.kind, ProviderKind::Value(_))
    }
}

impl From<Class> for ProviderRecord {
    fn from(class: Class) -> Self {
        Self {
            provide: class.token(),
            kind: ProviderKind::Class(class),
            providers: Vec::new(),
        }
    }
}

impl From<&ProviderRecord> for Token {
    fn from(record: &ProviderRecord) -> Self {
        record.provide.clone()
    }
}

impl Debug for ProviderRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ProviderKind::Value(_) => "value",
            ProviderKind::Class(_) => "class",
            ProviderKind::Factory(_) => "factory",
        };
        f.debug_struct("ProviderRecord")
            .field("provide", &self.provide)
            .field("kind", &kind)
            .field("providers", &self.providers)
            .finish()
    }
}

/// A bare class becomes a class provider keyed by the class itself,
/// records pass through untouched
#[inline]
#[must_use]
pub fn normalize_provider(provider: impl Into<ProviderRecord>) -> ProviderRecord {
    provider.into()
}

#[must_use]
pub fn normalize_providers<I>(providers: I) -> Vec<ProviderRecord>
where
    I: IntoIterator,
    I::Item: Into<ProviderRecord>,
{
    providers.into_iter().map(Into::into).collect()
}

/// Whether both records provide the same token
#[inline]
#[must_use]
pub fn same_provider(left: &ProviderRecord, right: &ProviderRecord) -> bool {
    left.provide == right.provide
}

/// Providers of `left`, then those of `right` whose token `left` doesn't provide
#[must_use]
pub fn merge_favoring_left(left: Vec<ProviderRecord>, right: Vec<ProviderRecord>) -> Vec<ProviderRecord> {
    let mut merged = left;
    let missing: Vec<_> = right
        .into_iter()
        .filter(|record| !merged.iter().any(|existing| same_provider(existing, record)))
        .collect();
    merged.extend(missing);
    merged
}

/// Providers of `right`, then those of `left` whose token `right` doesn't provide
#[inline]
#[must_use]
pub fn merge_favoring_right(left: Vec<ProviderRecord>, right: Vec<ProviderRecord>) -> Vec<ProviderRecord> {
    merge_favoring_left(right, left)
}

#[cfg(test)]
mod tests {
    use super::{merge_favoring_left, merge_favoring_right, normalize_providers, ProviderKind, ProviderRecord};
    use crate::{
        class::{Arguments, Class, Injectable},
        errors::InstantiateErrorKind,
        token::Token,
    };

    use tracing_test::traced_test;

    struct Service;

    impl Injectable for Service {
        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    fn value_of(record: &ProviderRecord) -> u8 {
        match &record.kind {
            ProviderKind::Value(value) => *value.downcast_ref::<u8>().unwrap(),
            ProviderKind::Class(_) | ProviderKind::Factory(_) => unreachable!(),
        }
    }

    #[test]
    #[traced_test]
    fn test_normalize_class() {
        let records = normalize_providers([Class::of::<Service>()]);

        assert_eq!(records[0].provide, Token::of::<Service>());
        assert_eq!(records[0].class_ref(), Some(&Class::of::<Service>()));
        assert!(records[0].providers.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_merge() {
        let left = vec![ProviderRecord::value("a", 1u8), ProviderRecord::value("b", 1u8)];
        let right = vec![ProviderRecord::value("b", 2u8), ProviderRecord::value("c", 2u8)];

        let merged = merge_favoring_left(left.clone(), right.clone());
        let summary: Vec<_> = merged.iter().map(|record| (record.provide.to_string(), value_of(record))).collect();
        assert_eq!(
            summary,
            [("\"a\"".to_owned(), 1), ("\"b\"".to_owned(), 1), ("\"c\"".to_owned(), 2)]
        );

        let merged = merge_favoring_right(left, right);
        let summary: Vec<_> = merged.iter().map(|record| (record.provide.to_string(), value_of(record))).collect();
        assert_eq!(
            summary,
            [("\"b\"".to_owned(), 2), ("\"c\"".to_owned(), 2), ("\"a\"".to_owned(), 1)]
        );
    }

    #[test]
    #[traced_test]
    fn test_factory_records() {
        let record = ProviderRecord::factory("sum", [ProviderRecord::value("a", 1u8)], |args| {
            Ok(*args.get::<u8>(0)? + 1)
        })
        .with_providers([Class::of::<Service>()]);

        assert_eq!(record.providers.len(), 2);
        assert!(matches!(record.kind, ProviderKind::Factory(_)));
        assert!(!record.is_value());
    }
}
