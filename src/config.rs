use std::collections::BTreeSet;

use crate::token::Token;

/// Config for an injector
/// ## Fields
/// - `mutable_tokens`:
///   Tokens that may be registered again, replacing the previous instance.
///
///   Every other token is registered once.
///   Registering it again fails instead of silently swapping the instance.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub mutable_tokens: BTreeSet<Token>,
}

impl Config {
    #[inline]
    #[must_use]
    pub fn with_mutable_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            mutable_tokens: tokens.into_iter().collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_mutable(&self, token: &Token) -> bool {
        self.mutable_tokens.contains(token)
    }
}
