//! Session tracking

mod registry;

pub use registry::SessionRegistry;
