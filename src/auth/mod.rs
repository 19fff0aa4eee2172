//! Azure AD authentication
//!
//! Client-credentials token exchange with in-memory caching and
//! serialized refresh.

mod credentials;

pub use credentials::{AuthError, CredentialManager};
