pub mod cli;
pub mod config;
pub mod error;
pub mod ui;

pub use config::Settings;
pub use error::{PidmonError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
