//! Core trait definitions
//!
//! The gateway depends on three external collaborators. Each is reached
//! through a narrow async trait so it can be mocked or swapped.

mod credentials;
mod jobs;
mod settings;

pub use credentials::{CredentialVerifier, Credentials};
pub use jobs::{JobResolver, ResolvedTarget};
pub use settings::{SettingsProvider, StaticSettingsProvider, CONTROL_PORT_SETTING};
