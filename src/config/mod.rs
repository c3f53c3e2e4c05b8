pub mod loader;
pub mod schema;

pub use loader::{CliOverrides, ConfigError, get_config_path, load_config};
pub use schema::Config;
