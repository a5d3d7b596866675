// Library exports for testing and potential reuse

pub mod config;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod server;
pub mod time;

// Re-export commonly used types
pub use config::{Config, ConfigSource};
pub use response::{ApiError, ApiResponse};
pub use server::{AppState, Lifecycle, RunningServer, ShutdownOutcome};
