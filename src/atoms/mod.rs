// ── mdsaad Atoms ───────────────────────────────────────────────────────────
// Pure data layer: types, errors, and built-in defaults.
// Atoms rule: no I/O, no side effects, no imports from engine/.

pub mod constants;
pub mod error;
pub mod types;
