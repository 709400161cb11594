pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::{ClientConfig, SoundTable};
pub use core::*;
pub use errors::client_error::{ClientError, ClientResult};
