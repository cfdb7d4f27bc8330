//! DTOs for the Kubernetes `TokenRequest` API

use serde::{Deserialize, Serialize};
use tokenfed::BearerToken;

/// A request for a new token for a service account
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    /// Always `authentication.k8s.io/v1`
    #[serde(rename = "apiVersion")]
    pub api_version: &'static str,

    /// Always `TokenRequest`
    pub kind: &'static str,

    /// The requested properties of the token
    pub spec: TokenRequestSpec<'a>,
}

/// The requested properties of a token
#[derive(Debug, Serialize)]
pub struct TokenRequestSpec<'a> {
    /// The requested lifetime of the token, in seconds
    #[serde(rename = "expirationSeconds")]
    pub expiration_seconds: u64,

    /// The intended audiences of the token
    #[serde(skip_serializing_if = "no_audiences")]
    pub audiences: &'a [String],
}

fn no_audiences(audiences: &&[String]) -> bool {
    audiences.is_empty()
}

/// A response from the `TokenRequest` API
#[derive(Debug, Deserialize)]
pub struct TokenRequestResponse {
    /// The issued token
    pub status: TokenRequestStatus,
}

/// The issued token
#[derive(Debug, Deserialize)]
pub struct TokenRequestStatus {
    /// The token itself
    pub token: BearerToken,

    /// When the token expires, as reported by the issuer
    #[serde(rename = "expirationTimestamp", default)]
    pub expiration_timestamp: Option<String>,
}
