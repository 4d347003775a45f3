//! Client for the identity service: app-credential acquisition and
//! device/app token validation against the service's JWKS keys.

pub mod client;
pub mod error;
pub mod jwks;
pub mod validate;

pub use client::IdentityClient;
pub use error::IdentityError;
pub use jwks::JwksCache;
pub use validate::{TokenClaims, TokenVerifier};
