//! CLI command implementations.

pub mod assets;
pub mod classify;
pub mod state;
pub mod sync;
