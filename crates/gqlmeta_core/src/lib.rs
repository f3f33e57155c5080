pub mod commands;
pub mod config;
pub mod context;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod metadata;
pub mod migrations;
pub mod runtime;

pub use commands::CommandOptions;
pub use context::{ExecutionContext, ServerConfig};
pub use errors::{CommandError, DriverError};
pub use metadata::MetadataAction;
