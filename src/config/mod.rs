//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TracelinkConfig (validated, immutable)
//!     → CLI positionals override per subcommand
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ClientConfig, ListenerConfig, ObservabilityConfig, SessionConfig, TracelinkConfig};
pub use validation::{validate_config, ValidationError};
