// mdsaad — multi-provider request fabric.
//
// Layering:
//   atoms/   pure data types, error enums, built-in defaults. No I/O.
//   engine/  the fabric: clock, rate limiter, circuit breaker, cache,
//            provider registry, sanitizer, dispatcher, proxy layer, history.
//   ops/     user-level operations (chat, weather, convert) on top of the engine.
//   config   ~/.mdsaad/config.json loading and environment merge.

pub mod atoms;
pub mod config;
pub mod engine;
pub mod ops;

pub use atoms::error::{CallError, FabricError, FabricResult};
