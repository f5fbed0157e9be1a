//! Per-user directory resolution.

pub mod utils;

pub use utils::*;
