//! burrow-core: Core abstractions and configuration for burrow
//!
//! This crate provides shared types, errors, configuration structures and
//! the collaborator traits used by the gateway.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::BurrowError;
pub use types::{RoutingKey, SessionId};
