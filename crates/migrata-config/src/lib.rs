pub mod loader;
pub mod model;

pub use loader::{CONFIG_FILE_NAME, ConfigLoader, ConfigOverrides};
pub use model::{DatabaseConfig, MigrataConfig, MigrationsConfig};
