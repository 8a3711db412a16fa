//! Docker registry authentication protocol pieces
//!
//! This module covers the three codecs the proxy is built on:
//! - Resource scope strings (`scope`)
//! - WWW-Authenticate Bearer challenges (`challenge`)
//! - The opaque client-facing tokens the proxy issues (`token`)

pub mod challenge;
pub mod scope;
pub mod token;

pub use challenge::BearerChallenge;
pub use scope::ResourceScope;
pub use token::{SecretKey, TokenCipher};
