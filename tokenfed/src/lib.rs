//! Federated verification of bearer tokens
//!
//! A service receiving a bearer token from a caller in another cluster cannot
//! verify it locally. Instead, the key id (`kid`) in the token header selects
//! one of a set of provisioned authorities, and that authority is asked,
//! through its `TokenReview` API, whether the token is authentic and who it
//! identifies. The reported identity is then checked against a local
//! allow-list.
//!
//! The key id is never trusted for anything beyond choosing where to ask.
//!
//! # Example
//!
//! ```no_run
//! use tokenfed::{
//!     BearerTokenRef, FederatedAuthority, Identity, IdentityPolicy, StaticRegistry,
//!     TokenReviewClient,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = StaticRegistry::builder()
//!     .with_authority("cluster-a", "https://api.cluster-a.internal")?
//!     .load_dir("/kid-mapping")
//!     .await?
//!     .build()?;
//!
//! let client = TokenReviewClient::builder()
//!     .with_ca_bundle_pem(std::fs::read("/etc/tokenfed/ca.pem")?)
//!     .build()?;
//!
//! let policy = IdentityPolicy::allow_one(Identity::from_static(
//!     "system:serviceaccount:default:admin-user",
//! ));
//!
//! let authority = FederatedAuthority::new(registry, client, policy);
//!
//! let token = BearerTokenRef::from_str("eyJraWQiOiJjbHVzdGVyLWEifQ.e30.c2ln");
//! let caller = authority.verify(token).await?;
//! println!("verified {}", caller.identity());
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![deny(unsafe_code)]

mod authority;
mod error;
pub mod policy;
pub mod registry;
pub mod review;
pub mod routing;
mod token;

pub use authority::{FederatedAuthority, VerifiedCaller};
pub use error::{AuthError, ErrorKind};
pub use policy::{IdentityPolicy, Unauthorized};
pub use registry::{AuthorityEndpoint, AuthorityResolver, StaticRegistry, UnknownAuthority};
pub use review::{TokenReviewClient, VerificationResult};
pub use token::{BearerToken, BearerTokenRef, Identity, IdentityRef, RoutingKey, RoutingKeyRef};
