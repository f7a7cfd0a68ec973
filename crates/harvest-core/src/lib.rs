//! Harvest Core
//!
//! Data model, configuration, and error taxonomy shared by the
//! capital-gain harvesting engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
