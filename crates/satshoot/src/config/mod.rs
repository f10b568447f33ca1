//! Sync layer configuration
//!
//! Stored as camelCase JSON; every field has a default so partial files load.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
