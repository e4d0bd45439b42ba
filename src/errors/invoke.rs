use std::{borrow::Cow, sync::Arc};

use crate::any::TypeInfo;

#[derive(thiserror::Error, Debug, Clone)]
pub enum InvokeErrorKind {
    #[error("Interceptor chain of `{method}` finished without a value. Call `invoke` or `transform` before returning")]
    AsyncContractViolation { method: Cow<'static, str> },
    #[error("Argument {index} of `{method}` isn't of type {expected}")]
    InvalidArgument {
        method: Cow<'static, str>,
        index: usize,
        expected: TypeInfo,
    },
    #[error("{0}")]
    Handler(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for InvokeErrorKind {
    fn from(err: anyhow::Error) -> Self {
        Self::Handler(Arc::new(err))
    }
}
