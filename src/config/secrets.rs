//! Secret handling utilities.
//!
//! Re-exports the secrecy types callers need to read the database URL
//! out of [`Config`](super::Config).

pub use secrecy::{ExposeSecret, SecretString};
