use std::fmt;

use thiserror::Error;

use crate::{
    policy::Unauthorized,
    registry::UnknownAuthority,
    review::ReviewError,
    routing::RoutingError,
    RoutingKey,
};

/// The category of an authentication or authorization failure
///
/// Every failure in this workspace maps onto exactly one kind. Transports use
/// the kind to choose a status code; logs record it as `error.kind`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ErrorKind {
    /// This process could not obtain its own token
    CredentialUnavailable,
    /// An inbound request carried no usable bearer credentials
    MissingCredentialsInRequest,
    /// The token header could not be decoded
    MalformedToken,
    /// The token header did not name a key id
    MissingRoutingKey,
    /// No authority was provisioned for the token's key id
    UnknownAuthority,
    /// The authority could not be reached
    NetworkError,
    /// The authority did not authenticate the token
    AuthorityRejected,
    /// The authority's answer could not be interpreted
    InvalidResponse,
    /// The verified identity is not permitted
    Unauthorized,
    /// Verification did not complete before the request deadline
    DeadlineExceeded,
}

impl ErrorKind {
    /// A stable, machine-readable name for the kind
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CredentialUnavailable => "credential_unavailable",
            Self::MissingCredentialsInRequest => "missing_credentials",
            Self::MalformedToken => "malformed_token",
            Self::MissingRoutingKey => "missing_routing_key",
            Self::UnknownAuthority => "unknown_authority",
            Self::NetworkError => "network_error",
            Self::AuthorityRejected => "authority_rejected",
            Self::InvalidResponse => "invalid_response",
            Self::Unauthorized => "unauthorized",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error while authenticating or authorizing an inbound caller
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request carried no usable bearer credentials
    #[error("request carries no bearer credentials")]
    MissingCredentials,
    /// The token could not be routed to an authority
    #[error("unable to route token")]
    Routing(#[from] RoutingError),
    /// No authority is provisioned for the token's key id
    #[error("unable to resolve authority")]
    UnknownAuthority(#[from] UnknownAuthority),
    /// The authority did not verify the token
    #[error("token review for key id {key} failed")]
    Review {
        /// The key id that selected the authority
        key: RoutingKey,
        /// The underlying review failure
        source: ReviewError,
    },
    /// The verified identity is not permitted
    #[error("caller is not authorized")]
    Unauthorized(#[from] Unauthorized),
    /// Verification did not complete before the request deadline
    #[error("verification did not complete before the request deadline")]
    DeadlineExceeded,
}

impl AuthError {
    /// The category of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredentials => ErrorKind::MissingCredentialsInRequest,
            Self::Routing(RoutingError::MalformedToken(_)) => ErrorKind::MalformedToken,
            Self::Routing(RoutingError::MissingRoutingKey) => ErrorKind::MissingRoutingKey,
            Self::UnknownAuthority(_) => ErrorKind::UnknownAuthority,
            Self::Review { source, .. } => match source {
                ReviewError::Network(_) => ErrorKind::NetworkError,
                ReviewError::Rejected { .. } => ErrorKind::AuthorityRejected,
                ReviewError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            },
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }
}
