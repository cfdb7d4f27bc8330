//! A token source that reads an environment variable

use std::{borrow::Cow, env};

use async_trait::async_trait;
use tokenfed::BearerToken;

use super::{non_empty_token, CredentialUnavailable, TokenSource};

/// A token source that reads the token from an environment variable
///
/// The variable is read on every request, so changes made after startup are
/// picked up. A missing, non-Unicode, or blank variable yields no token.
#[derive(Clone, Debug)]
pub struct EnvTokenSource {
    var: Cow<'static, str>,
}

impl EnvTokenSource {
    /// Constructs a new environment variable token source
    pub fn new(var: impl Into<Cow<'static, str>>) -> Self {
        Self { var: var.into() }
    }

    /// The name of the variable that is read
    pub fn var(&self) -> &str {
        &self.var
    }

    pub(crate) fn read(&self) -> Option<BearerToken> {
        env::var(&*self.var)
            .ok()
            .and_then(|value| non_empty_token(&value))
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        self.read().ok_or_else(|| {
            CredentialUnavailable::new(format!("environment variable {} is not set", self.var))
        })
    }
}
