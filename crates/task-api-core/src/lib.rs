pub mod actions;
pub mod config;
pub mod error;
pub mod exec;
pub mod tokens;

pub use error::{AuthError, CapacityError, ConfigError, Result};
