//! HTTP API surface

pub mod health;
pub mod inspect;

pub use health::health_routes;
pub use inspect::inspect_routes;
