//! Boundary adapters around the engine core.

#[cfg(feature = "web")]
pub mod http;
#[cfg(feature = "web")]
pub mod service;
