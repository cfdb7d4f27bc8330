//! Token sources

use std::{borrow::Cow, error, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokenfed::{BearerToken, ErrorKind};

pub mod env;
#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;
#[cfg(feature = "file")]
pub mod service_account;
#[cfg(all(feature = "file", feature = "token-request"))]
pub mod token_request;

pub use env::EnvTokenSource;
#[cfg(feature = "file")]
pub use file::FileTokenSource;
pub use in_memory::StaticTokenSource;
#[cfg(feature = "file")]
pub use service_account::ServiceAccountTokenSource;
#[cfg(all(feature = "file", feature = "token-request"))]
pub use token_request::TokenRequestSource;

/// Indicates that this process could not obtain its own token
#[derive(Debug, Error)]
#[error("local credentials unavailable: {reason}")]
pub struct CredentialUnavailable {
    reason: Cow<'static, str>,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync + 'static>>,
}

impl CredentialUnavailable {
    /// Constructs a new error with the given reason
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    /// Constructs a new error with the given reason and underlying cause
    pub fn with_source(
        reason: impl Into<Cow<'static, str>>,
        source: impl Into<Box<dyn error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// The reason the token could not be obtained
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The category of this failure
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::CredentialUnavailable
    }
}

/// An asynchronous source for this process's own bearer token
///
/// Sources are shared between concurrent calls, so requesting a token takes
/// `&self`.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Requests a token from the source
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        T::request_token(self).await
    }
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        T::request_token(self).await
    }
}

/// Trims surrounding whitespace, treating an empty result as no token
pub(crate) fn non_empty_token(raw: &str) -> Option<BearerToken> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(BearerToken::from(trimmed))
    }
}
