//! Extraction of the unverified routing key from a token header
//!
//! Nothing read here is trusted. The routing key only decides which
//! authority is asked about the token; the authority's answer is what
//! determines whether the caller is authenticated.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::Value;
use thiserror::Error;

use crate::{BearerTokenRef, RoutingKey};

/// Header segments larger than this are rejected before decoding
pub const MAX_HEADER_SEGMENT_LEN: usize = 8 * 1024;

/// The reason a token was considered malformed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Malformation {
    /// The token had no header segment
    MissingHeader,
    /// The header segment exceeded [`MAX_HEADER_SEGMENT_LEN`]
    HeaderTooLarge,
    /// The header segment was not URL-safe, unpadded base64
    InvalidBase64,
    /// The decoded header was not a JSON object
    InvalidJson,
}

impl Malformation {
    const fn description(self) -> &'static str {
        match self {
            Self::MissingHeader => "token has no header segment",
            Self::HeaderTooLarge => "token header segment is too large",
            Self::InvalidBase64 => "token header is not valid base64url",
            Self::InvalidJson => "token header is not a JSON object",
        }
    }
}

/// An error while reading the routing key from a token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The token header could not be decoded
    #[error("malformed token: {}", .0.description())]
    MalformedToken(Malformation),
    /// The token header carried no routing key
    #[error("token header does not name a key id")]
    MissingRoutingKey,
}

/// Reads the key id (`kid`) from the token header
///
/// Only the first `.`-delimited segment is inspected. The remaining
/// segments, including the signature, are not examined at all.
///
/// ```
/// use tokenfed::{routing::extract_routing_key, BearerTokenRef};
///
/// // {"alg":"RS256","kid":"cluster-a"}
/// let token = BearerTokenRef::from_str(
///     "eyJhbGciOiJSUzI1NiIsImtpZCI6ImNsdXN0ZXItYSJ9.e30.c2ln",
/// );
///
/// let key = extract_routing_key(token).unwrap();
/// assert_eq!(key.as_str(), "cluster-a");
/// ```
pub fn extract_routing_key(token: &BearerTokenRef) -> Result<RoutingKey, RoutingError> {
    let header = token
        .as_str()
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or(RoutingError::MalformedToken(Malformation::MissingHeader))?;

    if header.len() > MAX_HEADER_SEGMENT_LEN {
        return Err(RoutingError::MalformedToken(Malformation::HeaderTooLarge));
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| RoutingError::MalformedToken(Malformation::InvalidBase64))?;

    let mut header = match serde_json::from_slice(&decoded) {
        Ok(Value::Object(header)) => header,
        _ => return Err(RoutingError::MalformedToken(Malformation::InvalidJson)),
    };

    match header.remove("kid") {
        Some(Value::String(kid)) if !kid.is_empty() => Ok(RoutingKey::new(kid)),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            Err(RoutingError::MissingRoutingKey)
        }
        Some(_) => Err(RoutingError::MalformedToken(Malformation::InvalidJson)),
    }
}
