/// Normalizes a list of providers.
/// Classes, records and anything else convertible into a [`ProviderRecord`](crate::ProviderRecord) may be mixed.
///
/// ```
/// use injex::{providers, ProviderRecord};
///
/// let providers = providers![ProviderRecord::value("port", 8080u16), ProviderRecord::value("host", "localhost")];
/// assert_eq!(providers.len(), 2);
/// ```
#[macro_export]
macro_rules! providers {
    ($($provider:expr),* $(,)?) => {
        ::std::vec![$($crate::normalize_provider($provider)),*]
    };
}

/// Builds the arguments of an intercepted call
///
/// ```
/// use injex::args;
///
/// let args = args![1u8, "two"];
/// assert_eq!(args[1].downcast_ref::<&str>(), Some(&"two"));
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        ::std::vec![$(::std::sync::Arc::new($arg) as $crate::Value),*]
    };
}
