//! A fixed, in-memory token source

use async_trait::async_trait;
use tokenfed::BearerToken;

use super::{CredentialUnavailable, TokenSource};

/// A token source that always yields the same token
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    token: BearerToken,
}

impl StaticTokenSource {
    /// Constructs a new static token source
    pub const fn new(token: BearerToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        Ok(self.token.clone())
    }
}
