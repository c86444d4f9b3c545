pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::lifecycle::ForegroundOutcome;
pub use application::store_selector::AuthState;
pub use infrastructure::error::InfraError;
pub use infrastructure::logging::init_logging;
