pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_options, load_options_from_env};
pub use models::*;
pub use validation::{OptionsValidator, ValidationError, ValidationResult};
