//! A greeter service guarded by federated bearer-token verification
//!
//! The service answers `helloworld.Greeter/SayHello` with `Hello <name>`.
//! It is intended to run behind [`tokenfed_tonic::federated_auth_layer`],
//! and only greets callers whose [`VerifiedCaller`](tokenfed::VerifiedCaller)
//! has been placed in the request extensions.
//!
//! The `greeter-server` and `greeter-client` binaries wire the service and
//! a client together from [`config::ServerOptions`] and
//! [`config::ClientOptions`].

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

pub mod config;
mod greeter;

/// Messages and service stubs for the `helloworld` package
#[allow(missing_docs, unused_qualifications)]
pub mod helloworld {
    include!("proto/helloworld.rs");
}

pub use greeter::MyGreeter;
