pub mod config;
pub mod error;
pub mod types;

pub use config::AbodeConfig;
pub use error::{AbodeError, Result};
pub use types::*;
