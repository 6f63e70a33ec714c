// mdsaad Engine — the request fabric.
// Leaves first: clock, rate limiter, breaker, cache. Then the registry and
// sanitizer, the transport seam, and finally the dispatcher and proxy layer
// that orchestrate them. `Core` wires one of each together.

pub mod adapters;
pub mod breaker;
pub mod cache;
pub mod clock;
pub mod core;
pub mod dispatcher;
pub mod history;
pub mod proxy;
pub mod rate_limit;
pub mod registry;
pub mod sanitize;
pub mod transport;

pub use self::core::Core;
