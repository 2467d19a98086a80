//! codelens-core
//!
//! Shared vocabulary for the codelens workspace: chunk and result types, the
//! collaborator traits implemented by the index/embedding/graph crates, the
//! error taxonomy and configuration loading.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
