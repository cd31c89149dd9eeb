pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ENV_PREFIX, load_config};
pub use models::*;
pub use validation::{TransportConfigValidator, ValidationError, ValidationResult};
