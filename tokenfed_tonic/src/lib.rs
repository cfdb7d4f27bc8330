//! Tonic middleware for federated bearer-token verification
//!
//! On the server, [`VerifyCaller`] plugs a [`tokenfed_traits::Authority`]
//! into `tower_http`'s asynchronous authorization layer. Every inbound call
//! has its `authorization: Bearer <token>` metadata verified before the
//! handler runs, and the resulting [`VerifiedCaller`](tokenfed::VerifiedCaller)
//! is placed in the request extensions.
//!
//! On the client, [`BearerInterceptor`] attaches a token that was acquired
//! once, and [`AttachTokenLayer`] asks a [`TokenSource`](tokenfed_tokens::TokenSource)
//! for a token on every call.
//!
//! ```no_run
//! use tokenfed::{FederatedAuthority, IdentityPolicy, StaticRegistry, TokenReviewClient};
//! use tokenfed_tonic::{federated_auth_layer, TerseErrorHandler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = StaticRegistry::builder()
//!     .load_dir("/kid-mapping")
//!     .await?
//!     .build()?;
//! let client = TokenReviewClient::builder().build()?;
//! let policy: IdentityPolicy = ["system:serviceaccount:default:admin-user"]
//!     .into_iter()
//!     .collect();
//!
//! let authority = FederatedAuthority::new(registry, client, policy);
//! let on_error: TerseErrorHandler = TerseErrorHandler::new();
//! let layer = federated_auth_layer(authority, on_error);
//!
//! tonic::transport::Server::builder()
//!     .layer(layer)
//!     .add_routes(tonic::service::Routes::default())
//!     .serve("[::1]:50051".parse()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, marker::PhantomData};

mod client;
mod server;
pub mod util;

pub use crate::client::*;
pub use crate::server::*;

/// Terse responders for authentication and authorization failures
///
/// Each failure yields a fixed message that reveals only its category.
pub struct TerseErrorHandler<ResBody = tonic::body::BoxBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> TerseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for TerseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TerseErrorHandler")
    }
}

impl<ResBody> Default for TerseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Clone for TerseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Copy for TerseErrorHandler<ResBody> {}

/// Verbose responders for authentication and authorization failures
///
/// The status message carries this service's own error chain. Bodies
/// returned by remote authorities are never included.
pub struct VerboseErrorHandler<ResBody = tonic::body::BoxBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> VerboseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for VerboseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("VerboseErrorHandler")
    }
}

impl<ResBody> Default for VerboseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Clone for VerboseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Copy for VerboseErrorHandler<ResBody> {}
