pub mod loader;
pub mod models;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::load_config;
pub use models::*;
pub use store::ConfigStore;
pub use validation::{MainConfigValidator, ValidationError, ValidationResult};
