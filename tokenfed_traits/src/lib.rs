//! Token-based authorization with authorities that verify presented tokens
//! on behalf of the service receiving them.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]

mod authority;
mod policy;

pub use authority::Authority;
pub use policy::Policy;
