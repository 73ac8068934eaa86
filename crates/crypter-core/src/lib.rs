pub mod config;
pub mod error;

pub use config::CrypterConfig;
pub use error::{CrypterError, CrypterResult};
