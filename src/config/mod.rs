pub mod directive;
pub mod loader;
pub mod models;
pub mod validation;

pub use directive::{Attribute, Directive};
pub use loader::load_config;
pub use models::*;
pub use validation::{ProxyConfigValidator, ValidationError, ValidationResult};
