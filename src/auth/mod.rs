//! Credential lifecycle - account records, rotation, and token refresh
//!
//! Every upstream request rides on a short-lived OAuth bearer token belonging
//! to one user account. This module owns those accounts:
//!
//! - [`credentials`] - the on-disk record, expiry math, load/save
//! - [`pool`] - the accounts.json pool with its round-robin cursor
//! - [`refresh`] - the refresh-token exchange against the OAuth endpoint
//! - [`manager`] - mode selection (pool vs single credential) and the
//!   acquire path the executor calls per request

pub mod credentials;
pub mod manager;
pub mod pool;
pub mod refresh;

pub use credentials::Credential;
pub use manager::CredentialManager;
