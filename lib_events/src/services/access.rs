//! Static bearer-token authorization.

use std::collections::HashSet;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

use super::Authorizer;
use crate::error::SetupError;
use crate::model::{Caller, SubscriptionTarget};

/// Allows callers presenting one of a fixed set of tokens. With no tokens
/// configured every caller is allowed.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    viewers: Option<HashSet<String>>,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        Self { viewers: None }
    }

    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            viewers: Some(tokens.into_iter().map(Into::into).collect()),
        }
    }

    fn check(&self, caller: &Caller, target: &SubscriptionTarget) -> Result<(), SetupError> {
        let Some(viewers) = &self.viewers else {
            return Ok(());
        };
        match &caller.token {
            Some(token) if viewers.contains(token) => Ok(()),
            _ => Err(SetupError::Forbidden(format!("caller cannot view {}", target))),
        }
    }
}

impl Authorizer for StaticAuthorizer {
    fn can_view<'a>(
        &'a self,
        caller: &'a Caller,
        target: &'a SubscriptionTarget,
    ) -> BoxFuture<'a, Result<(), SetupError>> {
        future::ready(self.check(caller, target)).boxed()
    }
}
