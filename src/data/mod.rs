//! Data layer module
//!
//! Local actors and their key material, held in memory.

mod directory;
mod models;

pub use directory::ActorDirectory;
pub use models::*;
