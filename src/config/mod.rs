//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → Proxy::new resolves stream filters through the filter registry
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Filter-specific settings stay opaque JSON until their factory parses them
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::FilterConfig;
pub use schema::LimitsConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProxyConfig;
pub use schema::TimeoutConfig;
