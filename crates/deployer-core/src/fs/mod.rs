//! Filesystem primitives shared across features.

pub mod swap;

pub use swap::{SwapError, SwapShape, swap};
