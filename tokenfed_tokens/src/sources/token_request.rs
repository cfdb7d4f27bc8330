//! A token source that exchanges the mounted token for a short-lived one

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokenfed::BearerToken;

use super::{non_empty_token, CredentialUnavailable, ServiceAccountTokenSource, TokenSource};

pub mod dto;

/// The default lifetime requested for exchanged tokens
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(3600);

/// The API server address used by pods inside a cluster
pub const IN_CLUSTER_API_SERVER: &str = "https://kubernetes.default.svc";

/// The path at which the kubelet mounts the cluster CA bundle
pub const IN_CLUSTER_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// A token source backed by the Kubernetes `TokenRequest` API
///
/// Each request exchanges the token from an inner source (by default the
/// mounted service account token) for a new, time-boxed token for the given
/// service account. The expiry is fixed at construction and not negotiated.
#[derive(Debug)]
pub struct TokenRequestSource<S = ServiceAccountTokenSource> {
    client: reqwest::Client,
    token_url: Url,
    inner: S,
    expiration: Duration,
    audiences: Vec<String>,
}

impl<S> TokenRequestSource<S> {
    /// Constructs a new token request source
    ///
    /// The request is sent to
    /// `{api_server}/api/v1/namespaces/{namespace}/serviceaccounts/{service_account}/token`.
    pub fn new(
        client: reqwest::Client,
        api_server: &Url,
        namespace: &str,
        service_account: &str,
        inner: S,
    ) -> Result<Self, TokenRequestError> {
        let mut token_url = api_server.clone();
        token_url
            .path_segments_mut()
            .map_err(|()| TokenRequestError::InvalidApiServer(api_server.clone()))?
            .pop_if_empty()
            .extend([
                "api",
                "v1",
                "namespaces",
                namespace,
                "serviceaccounts",
                service_account,
                "token",
            ]);

        Ok(Self {
            client,
            token_url,
            inner,
            expiration: DEFAULT_EXPIRATION,
            audiences: Vec::new(),
        })
    }

    /// Requests tokens with the given lifetime
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Requests tokens for the given audiences
    pub fn with_audiences<I>(mut self, audiences: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// The URL the token request is sent to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

impl<S: TokenSource> TokenRequestSource<S> {
    /// Exchanges the inner token for a new one
    #[tracing::instrument(
        skip(self),
        fields(
            token_url = %self.token_url,
            expiration_seconds = self.expiration.as_secs(),
        ),
    )]
    pub async fn exchange(&self) -> Result<BearerToken, TokenRequestError> {
        let credential = self.inner.request_token().await?;

        let body = dto::TokenRequest {
            api_version: "authentication.k8s.io/v1",
            kind: "TokenRequest",
            spec: dto::TokenRequestSpec {
                expiration_seconds: self.expiration.as_secs(),
                audiences: &self.audiences,
            },
        };

        let resp = self
            .client
            .post(self.token_url.clone())
            .bearer_auth(credential.as_str())
            .json(&body)
            .send()
            .await
            .map_err(TokenRequestError::RequestSend)?;

        let status = resp.status();
        tracing::debug!(
            http.status_code = status.as_u16(),
            "received token response from issuing authority"
        );

        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(TokenRequestError::BodyReadError)?;
            return Err(TokenRequestError::ErrorWithBody { status, body });
        }

        let body = resp
            .bytes()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        let resp: dto::TokenRequestResponse = serde_json::from_slice(&body)?;

        let token =
            non_empty_token(resp.status.token.as_str()).ok_or(TokenRequestError::EmptyToken)?;

        tracing::info!(
            expiry = resp.status.expiration_timestamp.as_deref().unwrap_or("unknown"),
            "received new token"
        );

        Ok(token)
    }
}

#[async_trait]
impl<S: TokenSource> TokenSource for TokenRequestSource<S> {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        self.exchange()
            .await
            .map_err(|err| CredentialUnavailable::with_source("token request failed", err))
    }
}

/// An error while exchanging a token through the `TokenRequest` API
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The API server URL cannot have paths appended to it
    #[error("API server URL {0} cannot be used as a base")]
    InvalidApiServer(Url),
    /// The token to exchange was not available
    #[error("no token available to exchange")]
    Credential(#[from] CredentialUnavailable),
    /// The issuer answered with an error
    #[error("error requesting token from issuer ({status}): {body}")]
    ErrorWithBody {
        /// The status returned by the issuer
        status: StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from issuer")]
    TokenBodyError(#[from] serde_json::Error),
    /// The issuer returned an empty token
    #[error("issuer returned an empty token")]
    EmptyToken,
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the issuer
    #[error("error sending request to issuer")]
    RequestSend(#[source] reqwest::Error),
}
