pub mod config_manager;
pub mod context;
pub mod error;
pub mod types;

pub use config_manager::*;
pub use context::*;
pub use error::*;
pub use types::*;
