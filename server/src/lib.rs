pub mod accounts;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod history;
pub mod routes;
pub mod state;

pub use config::{Device, ServerConfig};
pub use error::{ApiError, ConfigError};
pub use routes::router;
pub use state::AppState;
