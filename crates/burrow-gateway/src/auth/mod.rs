//! Authentication for tunnel handshakes
//!
//! Users live in a [`UserIndex`]; each SSH password handshake goes through
//! the [`AuthGateway`], which consults an external [`CredentialVerifier`]
//! and records accepted sessions.
//!
//! [`CredentialVerifier`]: burrow_core::traits::CredentialVerifier

mod gateway;
mod users;
mod verifier;

pub use gateway::{AuthGateway, AuthOutcome, CATCH_ALL_SECRET, CATCH_ALL_USER};
pub use users::{parse_auth, parse_users, User, UserIndex, ALLOW_ALL_PATTERN};
pub use verifier::{HttpCredentialVerifier, RegistryVerifier};
