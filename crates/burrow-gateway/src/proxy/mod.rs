//! HTTP reverse proxying
//!
//! A static [`ReverseProxy`] serves all traffic not addressed to a dynamic
//! route; the [`DynamicProxyRegistry`] lazily resolves and caches one proxy
//! per routing key.

mod dynamic;
mod eviction;
mod jobs;
mod reverse;

pub use dynamic::{DynamicProxyRegistry, DynamicRoute};
pub use eviction::{eviction_interval, run_route_eviction};
pub use jobs::HttpJobResolver;
pub use reverse::{parse_target, ReverseProxy, TargetError};
