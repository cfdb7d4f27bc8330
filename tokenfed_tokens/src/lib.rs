//! Sources for a workload's own bearer token
//!
//! A client calling a federated service presents the token of its own
//! service account. This crate offers the usual ways of getting hold of that
//! token as interchangeable implementations of [`TokenSource`]:
//!
//! * [`sources::EnvTokenSource`] reads it from an environment variable,
//! * [`sources::FileTokenSource`] reads it from a file,
//! * [`sources::ServiceAccountTokenSource`] prefers an override variable and
//!   falls back to the mounted service account token, and
//! * [`sources::TokenRequestSource`] exchanges the mounted token for a
//!   short-lived one through the Kubernetes `TokenRequest` API.
//!
//! ```no_run
//! use tokenfed_tokens::{sources::ServiceAccountTokenSource, TokenSource};
//!
//! # async fn run() -> Result<(), tokenfed_tokens::CredentialUnavailable> {
//! let source = ServiceAccountTokenSource::new();
//! let token = source.request_token().await?;
//!
//! // Printing a token only reveals it when asked to explicitly
//! println!("acquired {token}");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
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
#![forbid(unsafe_code)]

pub mod sources;

pub use sources::{CredentialUnavailable, TokenSource};
