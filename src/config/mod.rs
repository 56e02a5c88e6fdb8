pub mod loader;
pub mod schema;

pub use loader::load_from_env;
pub use schema::{Config, DaCredentials, PersistenceConfig, ProviderKeys, VertexConfig};
