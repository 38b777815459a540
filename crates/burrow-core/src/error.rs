//! Core error types for burrow

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the burrow gateway
#[derive(Error, Debug)]
pub enum BurrowError {
    /// Construction of the server failed
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Route resolution error
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Listener / transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort server construction.
///
/// No partially-initialized server is ever returned alongside one of these.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Host key could not be generated or parsed
    #[error("Failed to create server identity: {0}")]
    Identity(String),

    /// The static proxy URL could not be parsed
    #[error("Invalid proxy URL {url}: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    /// The static proxy URL has no host component
    #[error("Missing protocol or host in proxy URL ({0})")]
    MissingProxyHost(String),

    /// The control port could not be resolved from the settings store
    #[error("Failed to get control port: {0}")]
    ControlPort(#[from] SettingsError),

    /// The user store could not be loaded
    #[error("Failed to load users: {0}")]
    Users(#[from] ConfigError),

    /// A collaborator client could not be built
    #[error("Failed to build client: {0}")]
    Client(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// JSON parse error (credential files)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// An address pattern failed to compile
    #[error("Invalid address pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Handshake authentication errors.
///
/// Display output carries the claimed user name at most, never a secret.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Credentials were rejected
    #[error("Invalid authentication for username: {0}")]
    Rejected(String),

    /// The credential provider could not be reached or misbehaved
    #[error("Credential provider error: {0}")]
    Provider(String),
}

/// Errors resolving a dynamic route through the job service
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    /// The RPC call itself failed
    #[error("Job service call failed: {0}")]
    Rpc(String),

    /// The job service returned no target for the key
    #[error("No backend target for {0}")]
    EmptyTarget(String),

    /// The job service returned a target that is not a usable URL
    #[error("Invalid backend target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// Listener and transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not bind the listening socket
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS setup failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server was started twice
    #[error("Server already started")]
    AlreadyStarted,

    /// `wait` was called before `start`
    #[error("Server not started")]
    NotStarted,

    /// The accept loop failed
    #[error("Listener failed: {0}")]
    Listener(#[from] std::io::Error),
}

/// Errors from a settings provider
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A required environment variable is not set
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The backing store failed
    #[error("Settings store error: {0}")]
    Store(String),

    /// The setting does not exist or is empty
    #[error("Setting {0} not found")]
    NotFound(String),
}
