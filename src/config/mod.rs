//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! Config built in code, or config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → Config::normalized (defaults, clamping)
//!     → stored by the engine, immutable from then on
//! ```
//!
//! # Design Decisions
//! - Normalization is total: every input yields a usable config
//! - All fields have defaults to allow minimal configs
//! - Capabilities that cannot be serialized are set in code only

pub mod loader;
pub mod schema;

pub use loader::{load_config, ConfigError};
pub use schema::{CircuitSettings, Config, IdentifierFn};
