//! Shared utilities: deterministic random number generation and the dense
//! vector/matrix primitives every layer is built on.

pub mod matrix;
pub mod rng;

pub use rng::SimpleRng;
