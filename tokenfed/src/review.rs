//! A client that asks a remote authority to review a bearer token
//!
//! The authority is expected to expose the Kubernetes `TokenReview` API. The
//! token under review is sent both as the subject of the review and as the
//! credential for the call itself.

use std::time::Duration;

use reqwest::{header, Certificate, StatusCode};
use thiserror::Error;

use crate::{registry::AuthorityEndpoint, BearerTokenRef, Identity};

pub mod dto;

/// The path of the token review resource, relative to an authority's base URL
pub const DEFAULT_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";

/// The API version sent with each token review
pub const DEFAULT_API_VERSION: &str = "authentication.k8s.io/v1";

/// The default timeout for a single review call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Review responses larger than this are treated as invalid
pub const MAX_RESPONSE_LEN: usize = 64 * 1024;

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// The identity an authority reported for an authenticated token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    /// Whether the authority authenticated the token
    pub authenticated: bool,
    /// The username reported by the authority
    pub identity: Identity,
    /// The unique identifier reported by the authority, if any
    pub uid: Option<String>,
    /// The groups reported by the authority
    pub groups: Vec<String>,
}

/// The reason a review response could not be used
#[derive(Debug, Error)]
pub enum InvalidResponse {
    /// The authority answered with an unexpected status code
    #[error("authority answered with unexpected status {0}")]
    Status(StatusCode),
    /// The response body was larger than [`MAX_RESPONSE_LEN`]
    #[error("review response exceeds {MAX_RESPONSE_LEN} bytes")]
    TooLarge,
    /// The response body was not a token review
    #[error("review response is not a token review")]
    Body(#[source] serde_json::Error),
    /// The token was reported authenticated without naming a user
    #[error("authority authenticated the token without reporting a username")]
    MissingUsername,
}

/// An error while reviewing a token
#[derive(Debug, Error)]
pub enum ReviewError {
    /// The authority could not be reached or the call timed out
    #[error("unable to reach authority")]
    Network(#[source] reqwest::Error),
    /// The authority did not authenticate the token
    #[error("authority rejected the token")]
    Rejected {
        /// The HTTP status, when the rejection was signalled by status code
        status: Option<StatusCode>,
    },
    /// The authority's answer could not be interpreted
    #[error("invalid response from authority")]
    InvalidResponse(#[from] InvalidResponse),
}

/// An error while constructing a [`TokenReviewClient`]
#[derive(Debug, Error)]
pub enum ReviewClientError {
    /// A configured CA bundle could not be parsed
    #[error("unable to parse CA bundle")]
    InvalidCaBundle(#[source] reqwest::Error),
    /// A configured CA bundle held no certificates
    #[error("CA bundle contains no certificates")]
    EmptyCaBundle,
    /// The underlying HTTP client could not be built
    #[error("unable to construct HTTP client")]
    Client(#[source] reqwest::Error),
}

/// Reviews tokens against remote authorities
///
/// A single pooled HTTP client is shared across every authority. Cloning the
/// review client is cheap and shares the pool.
#[derive(Clone, Debug)]
pub struct TokenReviewClient {
    client: reqwest::Client,
    review_path: String,
    api_version: String,
    audiences: Vec<String>,
}

impl TokenReviewClient {
    /// Starts building a new review client
    pub fn builder() -> TokenReviewClientBuilder {
        TokenReviewClientBuilder::default()
    }

    /// Asks `endpoint` whether `token` is authentic
    ///
    /// Each call performs exactly one round trip. Nothing is cached.
    pub async fn verify(
        &self,
        endpoint: &AuthorityEndpoint,
        token: &BearerTokenRef,
    ) -> Result<VerificationResult, ReviewError> {
        let url = endpoint.join_path(&self.review_path);

        let review = dto::TokenReview {
            kind: "TokenReview",
            api_version: &self.api_version,
            spec: dto::TokenReviewSpec {
                token,
                audiences: &self.audiences,
            },
        };

        tracing::trace!(%url, "requesting token review");

        let mut resp = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .header(header::CONTENT_TYPE, JSON_UTF8)
            .header(header::ACCEPT, "application/json")
            .json(&review)
            .send()
            .await
            .map_err(ReviewError::Network)?;

        let status = resp.status();
        tracing::debug!(
            http.status_code = status.as_u16(),
            "received token review response"
        );

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ReviewError::Rejected {
                status: Some(status),
            });
        } else if !status.is_success() {
            return Err(InvalidResponse::Status(status).into());
        }

        if resp
            .content_length()
            .map_or(false, |len| len > MAX_RESPONSE_LEN as u64)
        {
            return Err(InvalidResponse::TooLarge.into());
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(ReviewError::Network)? {
            if body.len() + chunk.len() > MAX_RESPONSE_LEN {
                return Err(InvalidResponse::TooLarge.into());
            }
            body.extend_from_slice(&chunk);
        }

        let review: dto::TokenReviewResponse =
            serde_json::from_slice(&body).map_err(InvalidResponse::Body)?;

        if !review.status.authenticated {
            return Err(ReviewError::Rejected { status: None });
        }

        let user = review.status.user.unwrap_or_default();
        if user.username.is_empty() {
            return Err(InvalidResponse::MissingUsername.into());
        }

        Ok(VerificationResult {
            authenticated: true,
            identity: Identity::new(user.username),
            uid: user.uid.filter(|uid| !uid.is_empty()),
            groups: user.groups,
        })
    }
}

/// Builder for a [`TokenReviewClient`]
#[derive(Debug)]
pub struct TokenReviewClientBuilder {
    ca_bundles: Vec<Vec<u8>>,
    insecure_skip_tls_verify: bool,
    allow_plaintext: bool,
    timeout: Duration,
    review_path: String,
    api_version: String,
    audiences: Vec<String>,
    user_agent: String,
}

impl Default for TokenReviewClientBuilder {
    fn default() -> Self {
        Self {
            ca_bundles: Vec::new(),
            insecure_skip_tls_verify: false,
            allow_plaintext: false,
            timeout: DEFAULT_TIMEOUT,
            review_path: DEFAULT_REVIEW_PATH.to_owned(),
            api_version: DEFAULT_API_VERSION.to_owned(),
            audiences: Vec::new(),
            user_agent: concat!("tokenfed/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TokenReviewClientBuilder {
    /// Trusts the certificates in a PEM bundle in addition to the web PKI roots
    pub fn with_ca_bundle_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_bundles.push(pem.into());
        self
    }

    /// Disables verification of authority certificates
    ///
    /// Only intended for local testing.
    pub fn insecure_skip_tls_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_tls_verify = skip;
        self
    }

    /// Permits reviews over plain HTTP
    ///
    /// Only intended for local testing.
    pub fn allow_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Bounds the total time of a single review call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the path of the review resource
    pub fn review_path(mut self, path: impl Into<String>) -> Self {
        self.review_path = path.into();
        self
    }

    /// Overrides the API version sent with each review
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Requires reviewed tokens to be valid for one of the given audiences
    pub fn audiences<I>(mut self, audiences: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the user agent sent to authorities
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Builds the review client
    pub fn build(self) -> Result<TokenReviewClient, ReviewClientError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .timeout(self.timeout)
            .https_only(!self.allow_plaintext);

        for pem in &self.ca_bundles {
            let certs =
                Certificate::from_pem_bundle(pem).map_err(ReviewClientError::InvalidCaBundle)?;
            if certs.is_empty() {
                return Err(ReviewClientError::EmptyCaBundle);
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if self.insecure_skip_tls_verify {
            tracing::warn!("TLS certificate verification toward authorities is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(ReviewClientError::Client)?;

        Ok(TokenReviewClient {
            client,
            review_path: self.review_path,
            api_version: self.api_version,
            audiences: self.audiences,
        })
    }
}
